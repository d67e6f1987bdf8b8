//! Scenario tests driving the library the way the binary does.

mod scenario_tests;

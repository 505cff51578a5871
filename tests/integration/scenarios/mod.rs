pub mod group_tests;
pub mod isolation_tests;
pub mod monkeypatch_tests;
pub mod outcome_tests;

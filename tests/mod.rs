mod common;
mod dead_letter_tests;
mod notifier_tests;
mod worker_tests;

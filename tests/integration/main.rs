mod fixture;

mod backup_tests;
mod migration_tests;
mod restore_tests;

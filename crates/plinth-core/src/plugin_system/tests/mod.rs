mod enabler_tests;
mod module_tests;
mod registry_tests;
mod state_tests;

mod compile_test;
mod modules_test;
mod run_test;
mod script_test;

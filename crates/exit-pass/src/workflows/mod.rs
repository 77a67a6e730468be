pub mod exit_pass;

pub mod echo;
pub mod run;

mod bbi;
mod common;
mod framework;
mod workflow;

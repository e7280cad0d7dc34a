pub mod command;
pub mod efp;
pub mod parser;

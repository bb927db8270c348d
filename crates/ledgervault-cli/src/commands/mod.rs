pub mod info;
pub mod login;
pub mod register;

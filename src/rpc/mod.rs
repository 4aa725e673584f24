pub mod commander;
pub mod payload;
pub mod pulse;
pub mod registry;
pub mod validator;

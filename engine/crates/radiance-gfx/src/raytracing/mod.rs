pub mod acceleration_inputs;
pub mod instance;

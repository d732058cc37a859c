pub mod address_validator;

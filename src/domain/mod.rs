pub mod record;
pub mod week;

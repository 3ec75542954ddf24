pub mod alerts;
pub mod gates;

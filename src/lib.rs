pub mod card;
pub mod review;
pub mod session;
pub mod sm2;
pub mod store;

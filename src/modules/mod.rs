pub mod factoid;
pub mod say;
pub mod seen;
pub mod vars;

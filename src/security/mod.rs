pub mod access_policy;
pub mod policy;
pub mod scope_guard;
pub mod token;

pub use access_policy::*;
pub use policy::*;
pub use scope_guard::*;
pub use token::*;

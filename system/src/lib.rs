mod hardware;
mod id;
mod os;

pub use crate::hardware::*;
pub use crate::id::*;
pub use crate::os::*;

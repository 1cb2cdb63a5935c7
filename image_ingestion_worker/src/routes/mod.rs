mod add_images;
mod get_collection;
mod health_check;
mod reset_collection;

pub use add_images::*;
pub use get_collection::*;
pub use health_check::*;
pub use reset_collection::*;

pub mod messaging;
pub mod vehicle;
pub mod util;
pub mod test_util;

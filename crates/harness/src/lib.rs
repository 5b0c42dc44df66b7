mod flaky;
mod store;

pub use flaky::FlakyStorage;
pub use store::TestStore;

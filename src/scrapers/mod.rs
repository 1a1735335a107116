pub mod getty;

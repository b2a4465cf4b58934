pub mod serve;
pub mod sort_csv;

pub use serve::handle_serve;
pub use sort_csv::handle_sort_csv;

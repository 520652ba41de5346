mod history_export;
mod operation_record;
mod operation_stream;

pub use history_export::*;
pub use operation_record::*;
pub use operation_stream::*;

pub mod report_writer;
pub mod script_reader;

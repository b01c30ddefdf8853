use std::io::Write;
use tempfile::NamedTempFile;

/// Writes a scenario script with the standard header and returns the file.
pub fn script_file(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "action, actor, tx, item, price, detail").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

use crate::domain::transaction::Transaction;
use crate::error::Result;
use std::io::Write;

/// Writes the final state of scripted transactions as CSV:
/// `tx,status,price,fee,total`.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_report<'a, I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Transaction)>,
    {
        self.writer.write_record(["tx", "status", "price", "fee", "total"])?;
        for (label, tx) in rows {
            self.writer.write_record([
                label,
                tx.status.to_string().as_str(),
                tx.price.to_string().as_str(),
                tx.escrow_fee.to_string().as_str(),
                tx.total_amount.to_string().as_str(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

//! Sequential invoice numbering
//!
//! Numbers look like `YYYY-MM-NNNN`: the calendar month of completion followed by
//! a four-digit counter that restarts at `0001` every month. The next number is
//! derived from the greatest number already stored, so allocation must run
//! inside the store's serialized completion section.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

const MAX_SEQUENCE: u32 = 9999;

/// Calendar month an invoice number belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u8,
}

impl YearMonth {
    pub fn new(year: i32, month: u8) -> BillingResult<Self> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(BillingError::Validation(format!(
                "invalid invoice month {}-{}",
                year, month
            )));
        }
        Ok(Self { year, month })
    }
}

impl From<OffsetDateTime> for YearMonth {
    fn from(at: OffsetDateTime) -> Self {
        Self {
            year: at.year(),
            month: u8::from(at.month()),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Split `YYYY-MM-NNNN` into its month prefix and counter
pub fn parse_invoice_number(number: &str) -> BillingResult<(&str, u32)> {
    let invalid = || BillingError::InvalidInvoiceNumber(number.to_string());

    let (prefix, counter) = number.rsplit_once('-').ok_or_else(invalid)?;
    if prefix.len() != 7 || counter.len() != 4 || !counter.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let sequence = counter.parse::<u32>().map_err(|_| invalid())?;

    Ok((prefix, sequence))
}

/// Next invoice number for `for_month`, given the greatest number issued so far
pub fn allocate(last: Option<&str>, for_month: YearMonth) -> BillingResult<String> {
    let prefix = for_month.to_string();

    let sequence = match last {
        Some(last) => {
            let (last_prefix, last_sequence) = parse_invoice_number(last)?;
            if last_prefix == prefix {
                last_sequence + 1
            } else {
                1
            }
        }
        None => 1,
    };

    if sequence > MAX_SEQUENCE {
        return Err(BillingError::InvoiceSequenceExhausted(prefix));
    }

    Ok(format!("{}-{:04}", prefix, sequence))
}

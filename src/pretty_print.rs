use std::fmt::{self, Debug, Display};

use crate::Tensor;

/// Prints a tensor as a matrix with sign-aligned columns.
///
/// Rank-2 tensors print one row per line, other ranks print flat on one line.
pub struct PrettyPrintTensor<'a> {
    name: &'a str,
    tensor: &'a Tensor,
    precision: usize,
}

impl<'a> PrettyPrintTensor<'a> {
    pub fn new(name: &'a str, tensor: &'a Tensor) -> Self {
        Self {
            name,
            tensor,
            precision: 4,
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }
}

impl Debug for PrettyPrintTensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

fn write_row(f: &mut fmt::Formatter, row: &[f32], precision: usize) -> fmt::Result {
    write!(f, "[")?;
    let mut iter = row.iter();
    while let Some(&element) = iter.next() {
        if element.is_sign_positive() {
            write!(f, " {element:.precision$}")?;
        } else {
            write!(f, "{element:.precision$}")?;
        }
        if iter.size_hint().0 != 0 {
            write!(f, " ")?;
        }
    }
    write!(f, "]")
}

impl Display for PrettyPrintTensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = self.name;
        let shape = self.tensor.shape();
        let Ok((n_rows, _)) = shape.as_matrix() else {
            write!(f, "{name}{shape} = ")?;
            return write_row(f, self.tensor.as_slice(), self.precision);
        };
        let center_line = n_rows / 2;
        let prefix = format!("{name}{shape} = ");
        for (i_line, row) in self.tensor.rows().enumerate() {
            if i_line == center_line {
                write!(f, "{prefix}")?;
            } else {
                write!(f, "{:width$}", "", width = prefix.len())?;
            }
            write_row(f, row, self.precision)?;
            if i_line + 1 != n_rows {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

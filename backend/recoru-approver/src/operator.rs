// src/operator.rs
//
// Interactive selection of department and month. Values given on the command
// line are used when valid; anything else falls back to asking.

use chrono::NaiveDate;
use std::io::{self, BufRead, Write};
use tracing::warn;

use crate::model::{Period, UnitChoice};
use crate::navigator::UnitCatalog;

pub struct OperatorPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> OperatorPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Fails with `UnexpectedEof` once the input is exhausted.
    fn ask(&mut self, question: &str) -> io::Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before a valid answer was given",
            ));
        }
        Ok(line.trim().to_string())
    }

    pub fn unit(&mut self, catalog: &UnitCatalog, preset: Option<usize>) -> io::Result<UnitChoice> {
        if let Some(ordinal) = preset {
            if ordinal >= 1 {
                return Ok(catalog.choice(ordinal));
            }
            warn!("Ignoring department number {} from the command line.", ordinal);
        }

        writeln!(self.output, "部署を選択してください:")?;
        for (i, name) in catalog.names().iter().enumerate() {
            writeln!(self.output, "  {}. {}", i + 1, name)?;
        }
        loop {
            let answer = self.ask("番号: ")?;
            match answer.parse::<usize>() {
                Ok(ordinal) if ordinal >= 1 => return Ok(catalog.choice(ordinal)),
                _ => writeln!(self.output, "1以上の番号を入力してください。")?,
            }
        }
    }

    pub fn period(&mut self, today: NaiveDate, preset: Option<(i32, u32)>) -> io::Result<Period> {
        if let Some((year, month)) = preset {
            match Period::validated(year, month, today) {
                Ok(period) => return Ok(period),
                Err(reason) => {
                    warn!("Ignoring period from the command line: {}", reason);
                    writeln!(self.output, "{}", reason)?;
                }
            }
        }

        loop {
            let year = self.ask("年 (例: 2025): ")?;
            let Ok(year) = year.parse::<i32>() else {
                writeln!(self.output, "年は4桁の数字で入力してください。")?;
                continue;
            };
            let month = self.ask("月 (1-12): ")?;
            let Ok(month) = month.parse::<u32>() else {
                writeln!(self.output, "月は数字で入力してください。")?;
                continue;
            };
            match Period::validated(year, month, today) {
                Ok(period) => return Ok(period),
                Err(reason) => writeln!(self.output, "{}", reason)?,
            }
        }
    }
}

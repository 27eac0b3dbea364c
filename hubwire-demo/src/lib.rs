use std::sync::atomic::{AtomicU64, Ordering};

use hubwire::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub calls: u64,
    pub failures: u64,
}

#[hubwire::service]
pub trait Calculator {
    async fn add(&self, a: i64, b: i64) -> Result<i64>;

    async fn divide(&self, a: f64, b: f64) -> Result<f64>;

    async fn greet(&self, name: &str) -> Result<String>;

    async fn stats(&self) -> Result<Stats>;

    async fn reset(&self) -> Result<()>;
}

/// Reference implementation served by the demo server.
#[derive(Default, Debug)]
pub struct CalculatorImpl {
    calls: AtomicU64,
    failures: AtomicU64,
}

impl Calculator for CalculatorImpl {
    async fn add(&self, a: i64, b: i64) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        a.checked_add(b).ok_or_else(|| {
            self.failures.fetch_add(1, Ordering::AcqRel);
            Error::new(ErrorKind::InvalidArgument, format!("{a} + {b} overflows"))
        })
    }

    async fn divide(&self, a: f64, b: f64) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if b == 0.0 {
            self.failures.fetch_add(1, Ordering::AcqRel);
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "division by zero".to_string(),
            ));
        }
        Ok(a / b)
    }

    async fn greet(&self, name: &str) -> Result<String> {
        let idx = self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(format!("hello {name}({idx})!"))
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            calls: self.calls.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
        })
    }

    async fn reset(&self) -> Result<()> {
        self.calls.store(0, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        Ok(())
    }
}

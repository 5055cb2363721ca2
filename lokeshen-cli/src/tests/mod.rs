//! Shared test harness modules for the Lokeshen CLI.

use super::*;

mod helpers;
mod steps;

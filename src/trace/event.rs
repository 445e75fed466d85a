//! Trace line format
//!
//! One event per line, space-separated fields:
//!
//! ```text
//! ba_trace_create <instance> <reserve> <alignment>
//! ba_trace_create_from_blockpairs <instance> <reserve> <alignment> [<offset> <size>] ...
//! ba_trace_destroy <instance>
//! ba_trace_alloc <instance> <size> <heat> <offset>
//! ba_trace_free <instance> <offset>
//! ```
//!
//! Keywords and field order are read back by replay tooling and must not
//! change.

use crate::allocator::BlockPair;
use std::fmt;
use std::str::FromStr;

const CREATE: &str = "ba_trace_create";
const CREATE_FROM_BLOCKPAIRS: &str = "ba_trace_create_from_blockpairs";
const DESTROY: &str = "ba_trace_destroy";
const ALLOC: &str = "ba_trace_alloc";
const FREE: &str = "ba_trace_free";

/// A single allocator lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Create {
        instance: u64,
        reserve: u64,
        alignment: u64,
    },
    CreateFromBlockPairs {
        instance: u64,
        reserve: u64,
        alignment: u64,
        pairs: Vec<BlockPair>,
    },
    Destroy {
        instance: u64,
    },
    Alloc {
        instance: u64,
        size: u64,
        heat: u64,
        offset: u64,
    },
    Free {
        instance: u64,
        offset: u64,
    },
}

impl TraceEvent {
    /// Allocator instance the event belongs to
    pub fn instance(&self) -> u64 {
        match self {
            TraceEvent::Create { instance, .. }
            | TraceEvent::CreateFromBlockPairs { instance, .. }
            | TraceEvent::Destroy { instance }
            | TraceEvent::Alloc { instance, .. }
            | TraceEvent::Free { instance, .. } => *instance,
        }
    }

    /// Keyword at the start of the event's line
    pub fn keyword(&self) -> &'static str {
        match self {
            TraceEvent::Create { .. } => CREATE,
            TraceEvent::CreateFromBlockPairs { .. } => CREATE_FROM_BLOCKPAIRS,
            TraceEvent::Destroy { .. } => DESTROY,
            TraceEvent::Alloc { .. } => ALLOC,
            TraceEvent::Free { .. } => FREE,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x}", self.keyword(), self.instance())?;
        match self {
            TraceEvent::Create {
                reserve, alignment, ..
            } => write!(f, " {} {}", reserve, alignment),
            TraceEvent::CreateFromBlockPairs {
                reserve,
                alignment,
                pairs,
                ..
            } => {
                write!(f, " {} {}", reserve, alignment)?;
                for pair in pairs {
                    write!(f, " [{} {}]", pair.offset, pair.size)?;
                }
                Ok(())
            }
            TraceEvent::Destroy { .. } => Ok(()),
            TraceEvent::Alloc {
                size, heat, offset, ..
            } => write!(f, " {} {} {}", size, heat, offset),
            TraceEvent::Free { offset, .. } => write!(f, " {}", offset),
        }
    }
}

/// Parse an instance token: `0x`-prefixed hex (as written) or decimal
fn parse_instance(token: &str) -> Result<u64, String> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| format!("invalid instance '{}'", token))
}

fn parse_u64(token: Option<&str>, field: &str) -> Result<u64, String> {
    let token = token.ok_or_else(|| format!("missing {}", field))?;
    token
        .parse()
        .map_err(|_| format!("invalid {} '{}'", field, token))
}

fn parse_pairs<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Result<Vec<BlockPair>, String> {
    let mut pairs = Vec::new();
    while let Some(open) = tokens.next() {
        let offset = open
            .strip_prefix('[')
            .ok_or_else(|| format!("expected '[<offset>', found '{}'", open))?;
        let close = tokens
            .next()
            .ok_or_else(|| "unterminated block pair".to_string())?;
        let size = close
            .strip_suffix(']')
            .ok_or_else(|| format!("expected '<size>]', found '{}'", close))?;
        pairs.push(BlockPair::new(
            parse_u64(Some(offset), "pair offset")?,
            parse_u64(Some(size), "pair size")?,
        ));
    }
    Ok(pairs)
}

impl FromStr for TraceEvent {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().ok_or_else(|| "empty line".to_string())?;
        let instance = parse_instance(tokens.next().ok_or_else(|| "missing instance".to_string())?)?;

        let event = match keyword {
            CREATE => TraceEvent::Create {
                instance,
                reserve: parse_u64(tokens.next(), "reserve")?,
                alignment: parse_u64(tokens.next(), "alignment")?,
            },
            CREATE_FROM_BLOCKPAIRS => {
                let reserve = parse_u64(tokens.next(), "reserve")?;
                let alignment = parse_u64(tokens.next(), "alignment")?;
                let pairs = parse_pairs(&mut tokens)?;
                TraceEvent::CreateFromBlockPairs {
                    instance,
                    reserve,
                    alignment,
                    pairs,
                }
            }
            DESTROY => TraceEvent::Destroy { instance },
            ALLOC => TraceEvent::Alloc {
                instance,
                size: parse_u64(tokens.next(), "size")?,
                heat: parse_u64(tokens.next(), "heat")?,
                offset: parse_u64(tokens.next(), "offset")?,
            },
            FREE => TraceEvent::Free {
                instance,
                offset: parse_u64(tokens.next(), "offset")?,
            },
            other => return Err(format!("unknown event '{}'", other)),
        };

        if let Some(extra) = tokens.next() {
            return Err(format!("unexpected trailing field '{}'", extra));
        }

        Ok(event)
    }
}

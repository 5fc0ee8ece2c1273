//! Piece model shared by the locator and the publisher.
//! Coordinates are millimetres from the board's bottom-left corner, published as the
//! 3-tuple `(x, 0, z)` (the middle value is always 0, kept for downstream consumers).
//! Unfilled slots are published as the sentinel `(6666, 6666, 0)`.

use image::Rgb;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Every color has exactly this many slots
pub const PIECES_PER_COLOR: usize = 12;

/// First two components of the empty-slot tuple
pub const SENTINEL_MM: i32 = 6666;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PieceColor {
    Black,
    White,
}

impl PieceColor {
    /// Annotation color in the result image.
    pub fn draw_color(self) -> Rgb<u8> {
        match self {
            PieceColor::Black => Rgb([255, 0, 0]),
            PieceColor::White => Rgb([0, 255, 0]),
        }
    }
}

impl fmt::Display for PieceColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceColor::Black => write!(f, "black"),
            PieceColor::White => write!(f, "white"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum PieceSlot {
    Found {
        x_mm: f64,
        z_mm: f64,
    },
    #[default]
    Empty,
}

impl fmt::Display for PieceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // `{:?}` keeps the shortest round-trip form, e.g. 65.0 or 179.5
            PieceSlot::Found { x_mm, z_mm } => write!(f, "({:?}, 0, {:?})", x_mm, z_mm),
            PieceSlot::Empty => write!(f, "({}, {}, 0)", SENTINEL_MM, SENTINEL_MM),
        }
    }
}

/// Fixed-capacity set of slots for one color.
#[derive(Clone, Debug, PartialEq)]
pub struct PieceSet {
    slots: [PieceSlot; PIECES_PER_COLOR],
}

impl Default for PieceSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl PieceSet {
    pub fn empty() -> Self {
        Self {
            slots: [PieceSlot::Empty; PIECES_PER_COLOR],
        }
    }

    /// Fills slots in iteration order; anything past the capacity is dropped.
    pub fn from_found(centers: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut set = Self::empty();
        for (slot, (x_mm, z_mm)) in set.slots.iter_mut().zip(centers) {
            *slot = PieceSlot::Found { x_mm, z_mm };
        }
        set
    }

    pub fn slots(&self) -> &[PieceSlot] {
        &self.slots
    }

    /// `(x_mm, z_mm)` of every filled slot.
    pub fn found(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.slots.iter().filter_map(|slot| match *slot {
            PieceSlot::Found { x_mm, z_mm } => Some((x_mm, z_mm)),
            PieceSlot::Empty => None,
        })
    }

    pub fn found_count(&self) -> usize {
        self.found().count()
    }
}

impl fmt::Display for PieceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, slot) in self.slots().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", slot)?;
        }
        f.write_str("]")
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("malformed piece list: {0}")]
pub struct PieceListError(String);

impl FromStr for PieceSet {
    type Err = PieceListError;

    /// Parses the published list form, e.g. `[(65.0, 0, 179.0), (6666, 6666, 0)]`.
    /// Short lists are padded with empty slots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| PieceListError(format!("not a list: '{}'", s.trim())))?;

        let mut slots = Vec::new();
        let mut rest = inner.trim();
        while !rest.is_empty() {
            let open = rest
                .strip_prefix('(')
                .ok_or_else(|| PieceListError(format!("expected '(' at '{}'", rest)))?;
            let close = open
                .find(')')
                .ok_or_else(|| PieceListError(format!("unclosed tuple at '{}'", rest)))?;
            slots.push(parse_slot(&open[..close])?);

            rest = open[close + 1..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        if slots.len() > PIECES_PER_COLOR {
            return Err(PieceListError(format!(
                "{} entries, at most {} allowed",
                slots.len(),
                PIECES_PER_COLOR
            )));
        }
        let mut set = Self::empty();
        set.slots[..slots.len()].copy_from_slice(&slots);
        Ok(set)
    }
}

fn parse_slot(tuple: &str) -> Result<PieceSlot, PieceListError> {
    let values = tuple
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| PieceListError(format!("bad number '{}'", v.trim())))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    match values[..] {
        [a, b, c] if a == SENTINEL_MM as f64 && b == SENTINEL_MM as f64 && c == 0.0 => {
            Ok(PieceSlot::Empty)
        }
        [x_mm, _, z_mm] => Ok(PieceSlot::Found { x_mm, z_mm }),
        _ => Err(PieceListError(format!(
            "expected 3 values, got {} in '({})'",
            values.len(),
            tuple
        ))),
    }
}

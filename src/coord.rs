//! Core coordinate and destination types for the NoC grid.
//!
//! All coordinates are physical `(device, row, col)` positions on the router
//! grid. A transfer destination is either a single coordinate (unicast) or a
//! set of axis-aligned rectangles (multicast), iterated in row-major order.

/// Identifies one chip in a (possibly multichip) device. Negative means "unset";
/// the special value [`MESH_DEVICE`] addresses the cross-device aggregate.
pub type DeviceId = i16;

/// Sentinel device ID for mesh-wide aggregate statistics ("all devices").
pub const MESH_DEVICE: DeviceId = -1;

/// Simulated device cycles.
pub type Cycle = u64;

/// Bandwidth unit used throughout: bytes moved per device cycle.
pub type BytesPerCycle = f32;

// ---------------------------------------------------------------------------
// NocType / CoreType
// ---------------------------------------------------------------------------

/// Which of the two NoCs a transfer rides on. Each NoC has its own routing
/// direction convention: NOC0 routes east-then-south, NOC1 north-then-west.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NocType {
    Noc0,
    Noc1,
}

impl std::fmt::Display for NocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NocType::Noc0 => write!(f, "NOC0"),
            NocType::Noc1 => write!(f, "NOC1"),
        }
    }
}

/// The functional type of a grid cell; determines injection/absorption rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoreType {
    #[default]
    Undef,
    Worker,
    Dram,
    Eth,
}

impl std::fmt::Display for CoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreType::Undef  => write!(f, "UNDEF"),
            CoreType::Worker => write!(f, "WORKER"),
            CoreType::Dram   => write!(f, "DRAM"),
            CoreType::Eth    => write!(f, "ETH"),
        }
    }
}

// ---------------------------------------------------------------------------
// Coord
// ---------------------------------------------------------------------------

/// A physical router-grid position: `(device_id, row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coord {
    pub device_id: DeviceId,
    pub row: i16,
    pub col: i16,
}

impl Coord {
    pub const fn new(device_id: DeviceId, row: i16, col: i16) -> Self {
        Coord { device_id, row, col }
    }
}

impl Default for Coord {
    /// All components "unset".
    fn default() -> Self {
        Coord { device_id: -1, row: -1, col: -1 }
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}:({},{})", self.device_id, self.row, self.col)
    }
}

// ---------------------------------------------------------------------------
// Multicast coordinate sets
// ---------------------------------------------------------------------------

/// One axis-aligned rectangle of coordinates; `start` is the top-left corner,
/// `end` the bottom-right, both inclusive and on the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordRect {
    pub start: Coord,
    pub end: Coord,
}

impl CoordRect {
    pub fn num_coords(&self) -> usize {
        let rows = (self.end.row - self.start.row + 1).max(0) as usize;
        let cols = (self.end.col - self.start.col + 1).max(0) as usize;
        rows * cols
    }
}

/// A non-empty set of rectangles forming a multicast target. Iteration yields
/// every covered coordinate in row-major order, rectangle by rectangle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MulticastCoordSet {
    pub rects: Vec<CoordRect>,
}

impl MulticastCoordSet {
    pub fn new(start: Coord, end: Coord) -> Self {
        MulticastCoordSet { rects: vec![CoordRect { start, end }] }
    }

    /// Lazy row-major walk over all covered coordinates. Restartable.
    pub fn iter(&self) -> impl Iterator<Item = Coord> + '_ {
        self.rects.iter().flat_map(|rect| {
            let r = *rect;
            (r.start.row..=r.end.row).flat_map(move |row| {
                (r.start.col..=r.end.col).map(move |col| Coord::new(r.start.device_id, row, col))
            })
        })
    }

    /// Total number of coordinates covered by all rectangles.
    pub fn grid_size(&self) -> usize {
        self.rects.iter().map(CoordRect::num_coords).sum()
    }
}

impl std::fmt::Display for MulticastCoordSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, rect) in self.rects.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "d{}:({},{})-({},{})",
                rect.start.device_id, rect.start.row, rect.start.col, rect.end.row, rect.end.col,
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NocDestination
// ---------------------------------------------------------------------------

/// Where a transfer lands: a single coordinate or a multicast rectangle set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NocDestination {
    Unicast(Coord),
    Multicast(MulticastCoordSet),
}

impl NocDestination {
    /// Device the destination lives on (multicast rectangles share one device).
    pub fn device_id(&self) -> DeviceId {
        match self {
            NocDestination::Unicast(c) => c.device_id,
            NocDestination::Multicast(m) => {
                m.rects.first().map(|r| r.start.device_id).unwrap_or(-1)
            }
        }
    }
}

impl std::fmt::Display for NocDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NocDestination::Unicast(c) => write!(f, "{}", c),
            NocDestination::Multicast(m) => write!(f, "{}", m),
        }
    }
}

// ---------------------------------------------------------------------------
// Torus arithmetic
// ---------------------------------------------------------------------------

/// Wraps `number` into `[0, range)`, handling negative inputs.
pub fn wrap_to_range(number: i64, range: i64) -> i64 {
    ((number % range) + range) % range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_to_range_handles_negatives() {
        assert_eq!(wrap_to_range(3, 10), 3);
        assert_eq!(wrap_to_range(13, 10), 3);
        assert_eq!(wrap_to_range(-1, 10), 9);
        assert_eq!(wrap_to_range(-11, 10), 9);
        assert_eq!(wrap_to_range(0, 12), 0);
    }

    #[test]
    fn multicast_iterates_row_major() {
        let m = MulticastCoordSet::new(Coord::new(0, 1, 1), Coord::new(0, 2, 3));
        let coords: Vec<Coord> = m.iter().collect();
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], Coord::new(0, 1, 1));
        assert_eq!(coords[1], Coord::new(0, 1, 2));
        assert_eq!(coords[2], Coord::new(0, 1, 3));
        assert_eq!(coords[3], Coord::new(0, 2, 1));
        assert_eq!(coords[5], Coord::new(0, 2, 3));
        assert_eq!(m.grid_size(), 6);
    }

    #[test]
    fn single_cell_multicast_yields_one_coord() {
        let m = MulticastCoordSet::new(Coord::new(0, 4, 4), Coord::new(0, 4, 4));
        assert_eq!(m.grid_size(), 1);
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![Coord::new(0, 4, 4)]);
    }

    #[test]
    fn multicast_iteration_is_restartable() {
        let m = MulticastCoordSet::new(Coord::new(0, 0, 0), Coord::new(0, 1, 1));
        let first: Vec<Coord> = m.iter().collect();
        let second: Vec<Coord> = m.iter().collect();
        assert_eq!(first, second);
    }
}

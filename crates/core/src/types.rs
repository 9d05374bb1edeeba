use serde::{Deserialize, Serialize};

/// Vertical offset applied to regions after region 0 when region 0 fires.
pub const DETECTED_SHIFT: i32 = -23;

/// Screen-coordinate capture rectangle. Always normalized so that
/// `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Same rectangle moved vertically by `dy` pixels.
    pub fn shifted(&self, dy: i32) -> Self {
        Self {
            x1: self.x1,
            y1: self.y1.saturating_add(dy),
            x2: self.x2,
            y2: self.y2.saturating_add(dy),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center(&self) -> ClickPoint {
        ClickPoint {
            x: midpoint(self.x1, self.x2),
            y: midpoint(self.y1, self.y2),
        }
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

impl From<[i32; 4]> for Region {
    fn from(r: [i32; 4]) -> Self {
        Region::new(r[0], r[1], r[2], r[3])
    }
}

impl From<Region> for [i32; 4] {
    fn from(r: Region) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})-({}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Absolute screen position for a synthetic click. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct ClickPoint {
    pub x: i32,
    pub y: i32,
}

impl ClickPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn shifted(&self, dy: i32) -> Self {
        Self { x: self.x, y: self.y + dy }
    }
}

impl From<[i32; 2]> for ClickPoint {
    fn from(p: [i32; 2]) -> Self {
        ClickPoint { x: p[0], y: p[1] }
    }
}

impl From<ClickPoint> for [i32; 2] {
    fn from(p: ClickPoint) -> Self {
        [p.x, p.y]
    }
}

impl std::str::FromStr for ClickPoint {
    type Err = String;

    /// Parse `x,y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
        let x = x.trim().parse().map_err(|_| format!("bad x in '{}'", s))?;
        let y = y.trim().parse().map_err(|_| format!("bad y in '{}'", s))?;
        Ok(ClickPoint { x, y })
    }
}

/// Ordered click sequence fired when a region's detection is true.
pub type ClickTarget = Vec<ClickPoint>;

/// Lifecycle of the background detection loop, shown in the TUI banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Stopping,
    Stopped,
}

/// Per-region outcome of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReport {
    pub index: usize,
    pub rect: Region,
    pub detected: bool,
    /// `None` when no click sequence was attempted.
    pub clicked: Option<bool>,
}

/// Result of one full pass over all regions.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub regions: Vec<RegionReport>,
    pub vertical_shift: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_swaps_inverted_corners() {
        let r = Region::new(300, 400, 100, 200);
        assert_eq!(r, Region { x1: 100, y1: 200, x2: 300, y2: 400 });
    }

    #[test]
    fn region_keeps_ordered_corners() {
        let r = Region::new(10, 20, 30, 40);
        assert_eq!(r, Region { x1: 10, y1: 20, x2: 30, y2: 40 });
        assert_eq!((r.width(), r.height()), (20, 20));
    }

    #[test]
    fn region_normalizes_when_deserialized() {
        let r: Region = serde_json::from_str("[300, 400, 100, 200]").unwrap();
        assert_eq!(r, Region::new(100, 200, 300, 400));
        assert_eq!(serde_json::to_string(&r).unwrap(), "[100,200,300,400]");
    }

    #[test]
    fn region_shift_moves_only_y() {
        let r = Region::new(0, 100, 50, 150).shifted(DETECTED_SHIFT);
        assert_eq!(r, Region { x1: 0, y1: 77, x2: 50, y2: 127 });
    }

    #[test]
    fn extreme_corners_do_not_overflow() {
        let r = Region::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(r.width(), u32::MAX);
        assert_eq!(r.height(), u32::MAX);
        assert!(!r.is_empty());
        assert_eq!(r.center(), ClickPoint::new(0, 0));
        assert_eq!(r.shifted(-23).y1, i32::MIN);
        assert_eq!(Region::new(-5, -5, 5, 5).width(), 10);
    }

    #[test]
    fn click_point_parses() {
        assert_eq!("12, 34".parse::<ClickPoint>(), Ok(ClickPoint::new(12, 34)));
        assert!("12".parse::<ClickPoint>().is_err());
        assert!("a,b".parse::<ClickPoint>().is_err());
    }
}

/// Axis-aligned rectangles used to describe band regions.

use serde::{Deserialize, Serialize};

/// Pixel rectangle `(x, y, width, height)`, origin top-left
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rectangle enclosing both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Overlapping region, or the all-zero box when the extents do not overlap
    /// on both axes. Boxes that only share an edge do not overlap.
    pub fn intersection(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return BoundingBox::default();
        }
        BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Same vertical extent, stretched over the full image width
    pub fn to_horizontal_strip(&self, image_width: u32) -> BoundingBox {
        BoundingBox {
            x: 0,
            y: self.y,
            width: image_width,
            height: self.height,
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(x={}, y={}, w={}, h={})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Merge intersecting boxes until no two remaining boxes intersect.
///
/// Boxes keep the order in which their first member appeared.
pub fn group_bounding_boxes(boxes: &[BoundingBox]) -> Vec<BoundingBox> {
    let mut groups: Vec<BoundingBox> = boxes.iter().copied().filter(|b| !b.is_empty()).collect();

    loop {
        let mut merged_any = false;
        let mut i = 0;
        while i < groups.len() {
            let mut j = i + 1;
            while j < groups.len() {
                if groups[i].intersects(&groups[j]) {
                    groups[i] = groups[i].union(&groups[j]);
                    groups.remove(j);
                    merged_any = true;
                    // The grown box may now reach boxes already passed over
                    j = i + 1;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !merged_any {
            break;
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_encloses_both() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 8, 10, 10);
        assert_eq!(a.union(&b), BoundingBox::new(0, 0, 15, 18));
    }

    #[test]
    fn test_intersection_and_shared_edge() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), BoundingBox::new(5, 5, 5, 5));

        // Touching along y = 10 only
        let c = BoundingBox::new(0, 10, 10, 4);
        assert_eq!(a.intersection(&c), BoundingBox::default());
        assert!(!a.intersects(&c));

        let far = BoundingBox::new(50, 50, 2, 2);
        assert!(!a.intersects(&far));
    }

    #[test]
    fn test_group_merges_chains() {
        let boxes = vec![
            BoundingBox::new(0, 0, 100, 10),
            BoundingBox::new(0, 40, 100, 10),
            BoundingBox::new(0, 8, 100, 10),
            BoundingBox::new(0, 16, 100, 10),
        ];
        let grouped = group_bounding_boxes(&boxes);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0], BoundingBox::new(0, 0, 100, 26));
        assert_eq!(grouped[1], BoundingBox::new(0, 40, 100, 10));
        for (i, a) in grouped.iter().enumerate() {
            for b in grouped.iter().skip(i + 1) {
                assert!(!a.intersects(b));
            }
        }
    }

    #[test]
    fn test_group_remerges_grown_box() {
        // (2) only reaches (0) after (0) has absorbed (1)
        let boxes = vec![
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(8, 0, 10, 30),
            BoundingBox::new(0, 20, 5, 5),
        ];
        let grouped = group_bounding_boxes(&boxes);
        assert_eq!(grouped, vec![BoundingBox::new(0, 0, 18, 30)]);
    }

    #[test]
    fn test_horizontal_strip() {
        let b = BoundingBox::new(30, 12, 5, 7);
        assert_eq!(b.to_horizontal_strip(200), BoundingBox::new(0, 12, 200, 7));
    }
}

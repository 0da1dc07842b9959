mod proptest_helpers;

use dcmscrub::mask::ReconstructionMask;
use proptest::prelude::*;

const W: u32 = 48;
const H: u32 = 32;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn prop_mask_is_union_of_bounding_boxes(regions in proptest_helpers::arb_regions(W, H, 6)) {
        let mask = ReconstructionMask::from_regions(W, H, &regions);
        prop_assert_eq!(mask.dimensions(), (W, H));

        let mut expected = 0;
        for y in 0..H {
            for x in 0..W {
                let covered = regions
                    .iter()
                    .filter_map(|r| r.bounding_box())
                    .any(|b| b.contains(x as i32, y as i32));
                prop_assert_eq!(mask.is_masked(x, y), covered, "pixel ({}, {})", x, y);
                expected += covered as usize;
            }
        }
        prop_assert_eq!(mask.masked_count(), expected);
    }

    #[test]
    fn prop_region_order_does_not_matter(regions in proptest_helpers::arb_regions(W, H, 6)) {
        let forward = ReconstructionMask::from_regions(W, H, &regions);
        let mut reversed_regions = regions.clone();
        reversed_regions.reverse();
        let reversed = ReconstructionMask::from_regions(W, H, &reversed_regions);
        prop_assert_eq!(forward, reversed);
    }
}

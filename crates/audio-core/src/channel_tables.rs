//! Downmix coefficient tables.
//!
//! Each table defines, for every output channel, the weighted sum of
//! input channels used when folding one surround mask into a smaller
//! one. Tables are stored for downmix only; upmix matrices are the
//! transposes, derived by the mapper. Coefficients are the usual
//! panning constants: 1.0, 0.7071068 (-3 dB), 0.5 (-6 dB), 0.3535534
//! (-9 dB).
//!
//! Tables are grouped in clusters sharing an input mask, ordered from
//! small masks to large. The mapper walks them front to back when
//! downmixing and back to front when deriving upmixes, so the ordering
//! is load-bearing.

use crate::channels::masks::*;
use crate::channels::ChannelPosition::{self, *};

/// One weighted contribution of an input channel to an output channel.
#[derive(Debug, Clone, Copy)]
pub struct MapRule {
    pub out_ch: ChannelPosition,
    pub in_ch: ChannelPosition,
    pub coeff: f32,
}

const fn rule(out_ch: ChannelPosition, in_ch: ChannelPosition, coeff: f32) -> MapRule {
    MapRule {
        out_ch,
        in_ch,
        coeff,
    }
}

/// A downmix table from `in_mask` to `out_mask`.
#[derive(Debug, Clone, Copy)]
pub struct MapTable {
    pub name: &'static str,
    pub in_mask: u32,
    pub out_mask: u32,
    pub rules: &'static [MapRule],
}

/// All downmix tables, cluster-ordered by input mask.
pub const MAP_TABLES: &[MapTable] = &[
    // 2.1<>...
    MapTable {
        name: "2.1<>1.1",
        in_mask: SURROUND_2_1,
        out_mask: SURROUND_1_1,
        rules: &[
            rule(FrontCenter, FrontLeft, 0.7071068),
            rule(FrontCenter, FrontRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 3.1<>...
    MapTable {
        name: "3.1<>1.1",
        in_mask: SURROUND_3_1,
        out_mask: SURROUND_1_1,
        rules: &[
            rule(FrontCenter, FrontLeft, 0.7071068),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontCenter, FrontRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "3.1<>2.1",
        in_mask: SURROUND_3_1,
        out_mask: SURROUND_2_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, FrontCenter, 0.7071068),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, FrontCenter, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 4.1<>...
    MapTable {
        name: "4.1<>2.1",
        in_mask: SURROUND_4_1,
        out_mask: SURROUND_2_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, BackLeft, 0.7071068),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, BackRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "4.1<>3.1",
        in_mask: SURROUND_4_1,
        out_mask: SURROUND_3_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, BackLeft, 0.7071068),
            rule(FrontCenter, FrontLeft, 0.7071068),
            rule(FrontCenter, FrontRight, 0.7071068),
            rule(FrontCenter, BackLeft, 0.5),
            rule(FrontCenter, BackRight, 0.5),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, BackRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 5.1<>...
    MapTable {
        name: "5.1<>3.1",
        in_mask: SURROUND_5_1,
        out_mask: SURROUND_3_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, BackLeft, 0.7071068),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, BackRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "5.1<>4.1",
        in_mask: SURROUND_5_1,
        out_mask: SURROUND_4_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, FrontCenter, 0.7071068),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, FrontCenter, 0.7071068),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 5.1.2<>...
    MapTable {
        name: "5.1.2<>3.1",
        in_mask: SURROUND_5_1_2,
        out_mask: SURROUND_3_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, BackLeft, 0.7071068),
            rule(FrontLeft, TopMidLeft, 0.7071068),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, BackRight, 0.7071068),
            rule(FrontRight, TopMidRight, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "5.1.2<>4.1",
        in_mask: SURROUND_5_1_2,
        out_mask: SURROUND_4_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, FrontCenter, 0.7071068),
            rule(FrontLeft, TopMidLeft, 0.5),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, FrontCenter, 0.7071068),
            rule(FrontRight, TopMidRight, 0.5),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, TopMidLeft, 0.5),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, TopMidRight, 0.5),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "5.1.2<>5.1",
        in_mask: SURROUND_5_1_2,
        out_mask: SURROUND_5_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, TopMidLeft, 0.5),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, TopMidRight, 0.5),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, TopMidLeft, 0.5),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, TopMidRight, 0.5),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 6.1<>...
    MapTable {
        name: "6.1<>4.1",
        in_mask: SURROUND_6_1,
        out_mask: SURROUND_4_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, FrontCenter, 0.7071068),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, FrontCenter, 0.7071068),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, BackCenter, 0.7071068),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, BackCenter, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "6.1<>5.1",
        in_mask: SURROUND_6_1,
        out_mask: SURROUND_5_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, BackCenter, 0.7071068),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, BackCenter, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "6.1<>5.1.2",
        in_mask: SURROUND_6_1,
        out_mask: SURROUND_5_1_2,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, BackCenter, 0.7071068),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, BackCenter, 0.7071068),
            rule(TopMidLeft, FrontLeft, 1.0),
            rule(TopMidLeft, BackLeft, 1.0),
            rule(TopMidLeft, BackCenter, 0.7071068),
            rule(TopMidRight, FrontRight, 1.0),
            rule(TopMidRight, BackRight, 1.0),
            rule(TopMidRight, BackCenter, 0.7071068),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 7.1<>...
    MapTable {
        name: "7.1<>5.1",
        in_mask: SURROUND_7_1,
        out_mask: SURROUND_5_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "7.1<>5.1.2",
        in_mask: SURROUND_7_1,
        out_mask: SURROUND_5_1_2,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(TopMidLeft, FrontLeft, 1.0),
            rule(TopMidLeft, BackLeft, 1.0),
            rule(TopMidRight, FrontRight, 1.0),
            rule(TopMidRight, BackRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "7.1<>6.1",
        in_mask: SURROUND_7_1,
        out_mask: SURROUND_6_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackCenter, BackLeft, 1.0),
            rule(BackCenter, BackRight, 1.0),
            rule(BackCenter, SideLeft, 1.0),
            rule(BackCenter, SideRight, 1.0),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    // 7.1.2<>...
    MapTable {
        name: "7.1.2<>5.1",
        in_mask: SURROUND_7_1_2,
        out_mask: SURROUND_5_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, TopMidLeft, 0.5),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, TopMidRight, 0.5),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, TopMidLeft, 0.5),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, TopMidRight, 0.5),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "7.1.2<>5.1.2",
        in_mask: SURROUND_7_1_2,
        out_mask: SURROUND_5_1_2,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(TopMidLeft, TopMidLeft, 1.0),
            rule(TopMidRight, TopMidRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "7.1.2<>6.1",
        in_mask: SURROUND_7_1_2,
        out_mask: SURROUND_6_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontLeft, TopMidLeft, 0.5),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(FrontRight, TopMidRight, 0.5),
            rule(BackLeft, SideLeft, 1.0),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackLeft, TopMidLeft, 0.5),
            rule(BackCenter, BackLeft, 1.0),
            rule(BackCenter, BackRight, 1.0),
            rule(BackCenter, SideLeft, 1.0),
            rule(BackCenter, SideRight, 1.0),
            rule(BackCenter, TopMidLeft, 0.7071068),
            rule(BackCenter, TopMidRight, 0.7071068),
            rule(BackRight, SideRight, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(BackRight, TopMidRight, 0.5),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
    MapTable {
        name: "7.1.2<>7.1",
        in_mask: SURROUND_7_1_2,
        out_mask: SURROUND_7_1,
        rules: &[
            rule(FrontLeft, FrontLeft, 1.0),
            rule(FrontCenter, FrontCenter, 1.0),
            rule(FrontRight, FrontRight, 1.0),
            rule(SideLeft, SideLeft, 1.0),
            rule(SideLeft, TopMidLeft, 0.7071068),
            rule(SideRight, SideRight, 1.0),
            rule(SideRight, TopMidRight, 0.7071068),
            rule(BackLeft, BackLeft, 1.0),
            rule(BackRight, BackRight, 1.0),
            rule(LowFrequency, LowFrequency, 1.0),
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_downmixes() {
        for table in MAP_TABLES {
            assert!(
                table.in_mask.count_ones() > table.out_mask.count_ones(),
                "{} is not a downmix",
                table.name
            );
        }
    }

    #[test]
    fn test_rules_stay_inside_masks() {
        for table in MAP_TABLES {
            for rule in table.rules {
                assert!(
                    table.out_mask & rule.out_ch.mask() != 0,
                    "{}: output {} outside mask",
                    table.name,
                    rule.out_ch.name()
                );
                assert!(
                    table.in_mask & rule.in_ch.mask() != 0,
                    "{}: input {} outside mask",
                    table.name,
                    rule.in_ch.name()
                );
            }
        }
    }

    #[test]
    fn test_clusters_are_ordered() {
        // Input masks never shrink as the table index grows.
        let mut prev = 0;
        for table in MAP_TABLES {
            let size = table.in_mask.count_ones();
            assert!(size >= prev, "{} breaks cluster ordering", table.name);
            prev = size;
        }
    }
}

//! Channel mapping between surround layouts.
//!
//! Builds a single mapping matrix from the downmix tables, then applies
//! it per sample group. The tables do not enumerate every mask pair, so
//! the builder chains steps: downmixing pulls tables forward, upmixing
//! pulls the reverse tables backward and transposes them. Each row of the
//! final matrix is normalized so unit input cannot exceed unit output.

use tracing::debug;

use crate::channel_tables::{MapTable, MAP_TABLES};
use crate::channels::{ChannelLayout, ChannelSet, CHANNEL_POSITION_COUNT};
use crate::error::AudioResult;
use crate::frame::{Frame, FrameReader};
use crate::sample::{Sample, SampleSpec};

type ChannelMatrix = [[f32; CHANNEL_POSITION_COUNT]; CHANNEL_POSITION_COUNT];

/// Mapping matrix over frame indices of two channel sets.
pub struct ChannelMapper {
    in_set: ChannelSet,
    out_set: ChannelSet,
    /// `index_matrix[out_index][in_index]`, over enabled channels only.
    index_matrix: Vec<Vec<f32>>,
    identity: bool,
}

impl ChannelMapper {
    pub fn new(in_set: ChannelSet, out_set: ChannelSet) -> Self {
        let identity = in_set == out_set;

        let index_matrix = if identity {
            Vec::new()
        } else {
            build_index_matrix(in_set, out_set)
        };

        Self {
            in_set,
            out_set,
            index_matrix,
            identity,
        }
    }

    /// Map interleaved input samples into interleaved output samples.
    /// Both slices hold the same per-channel duration.
    pub fn map(&self, input: &[Sample], output: &mut [Sample]) {
        if self.identity {
            output.copy_from_slice(input);
            return;
        }

        let n_in = self.in_set.num_channels();
        let n_out = self.out_set.num_channels();
        debug_assert_eq!(input.len() / n_in, output.len() / n_out);

        for (in_group, out_group) in input.chunks_exact(n_in).zip(output.chunks_exact_mut(n_out))
        {
            for (out_index, out_sample) in out_group.iter_mut().enumerate() {
                let row = &self.index_matrix[out_index];
                let mut acc = 0.0;
                for (in_index, &in_sample) in in_group.iter().enumerate() {
                    acc += row[in_index] * in_sample;
                }
                *out_sample = acc;
            }
        }
    }

    /// Coefficient applied from input frame index to output frame index.
    pub fn coefficient(&self, out_index: usize, in_index: usize) -> f32 {
        if self.identity {
            if out_index == in_index {
                1.0
            } else {
                0.0
            }
        } else {
            self.index_matrix[out_index][in_index]
        }
    }
}

fn build_index_matrix(in_set: ChannelSet, out_set: ChannelSet) -> Vec<Vec<f32>> {
    debug!(%in_set, %out_set, "channel mapper: building mapping");

    let chan_map = if in_set.layout() == ChannelLayout::Surround
        && out_set.layout() == ChannelLayout::Surround
    {
        build_channel_mapping(in_set, out_set).unwrap_or_else(fallback_mapping)
    } else {
        // Multitrack streams have no positional meaning; channels map to
        // themselves by index via the diagonal.
        fallback_mapping()
    };

    // Project the position-keyed matrix onto frame indices.
    let mut index_matrix =
        vec![vec![0.0f32; in_set.num_channels()]; out_set.num_channels()];

    if in_set.layout() == ChannelLayout::Surround && out_set.layout() == ChannelLayout::Surround
    {
        for out_ch in out_set.positions() {
            for in_ch in in_set.positions() {
                let out_index = out_set.channel_index(out_ch).unwrap();
                let in_index = in_set.channel_index(in_ch).unwrap();
                index_matrix[out_index][in_index] =
                    chan_map[out_ch as usize][in_ch as usize];
            }
        }
    } else {
        for index in 0..in_set.num_channels().min(out_set.num_channels()) {
            index_matrix[index][index] = 1.0;
        }
    }

    index_matrix
}

/// Chain downmix/upmix tables until the conversion is covered. Returns
/// `None` when no table chain applies (the caller falls back to the
/// diagonal).
fn build_channel_mapping(in_set: ChannelSet, out_set: ChannelSet) -> Option<ChannelMatrix> {
    if in_set == out_set {
        return None;
    }

    let mut cur_in = in_set;
    let mut result: Option<ChannelMatrix> = None;

    loop {
        let downmixing = can_downmix(cur_in, out_set);

        let (table, actual_out) = if downmixing {
            match next_downmix_table(cur_in, out_set) {
                Some(table) => (table, ChannelSet::surround(table.out_mask)),
                None => break,
            }
        } else {
            match next_upmix_table(cur_in, out_set) {
                Some(table) => (table, ChannelSet::surround(table.in_mask)),
                None => break,
            }
        };

        debug!(
            table = table.name,
            dir = if downmixing { "downmix" } else { "upmix" },
            "channel mapper: pulling mapping table"
        );

        let next = mapping_from_table(table, downmixing, cur_in, actual_out);

        result = Some(match result {
            None => next,
            Some(prev) => combine_mappings(&prev, &next),
        });

        cur_in = actual_out;
    }

    result
}

fn can_downmix(in_set: ChannelSet, out_set: ChannelSet) -> bool {
    for (i, table) in MAP_TABLES.iter().enumerate() {
        if !in_set.is_subset_of(table.in_mask) {
            continue;
        }
        // First cluster covering the input; check whether any table in
        // it also covers the output.
        let in_mask = table.in_mask;
        for candidate in &MAP_TABLES[i..] {
            if candidate.in_mask != in_mask {
                break;
            }
            if out_set.is_subset_of(candidate.out_mask) {
                return true;
            }
        }
        break;
    }
    false
}

fn next_downmix_table(in_set: ChannelSet, out_set: ChannelSet) -> Option<&'static MapTable> {
    MAP_TABLES.iter().find(|table| {
        in_set.is_subset_of(table.in_mask)
            && out_set.is_subset_of(table.out_mask)
            && !in_set.is_subset_of(table.out_mask)
    })
}

/// Find the first step of an upmix chain. Tables only store downmixes,
/// so walk the would-be downmix from the output back to the input and
/// return its last step, which the caller transposes.
fn next_upmix_table(in_set: ChannelSet, out_set: ChannelSet) -> Option<&'static MapTable> {
    let mut next_tbl = None;
    let mut next_set = out_set;

    loop {
        let mut best = None;
        for table in MAP_TABLES.iter().rev() {
            if in_set.is_subset_of(table.out_mask)
                && next_set.is_subset_of(table.in_mask)
                && !next_set.is_subset_of(table.out_mask)
            {
                best = Some(table);
            }
        }

        let Some(table) = best else {
            break;
        };

        next_tbl = Some(table);
        next_set = ChannelSet::surround(table.out_mask);
    }

    next_tbl
}

fn mapping_from_table(
    table: &MapTable,
    downmixing: bool,
    in_set: ChannelSet,
    out_set: ChannelSet,
) -> ChannelMatrix {
    let mut raw: ChannelMatrix = [[0.0; CHANNEL_POSITION_COUNT]; CHANNEL_POSITION_COUNT];
    for rule in table.rules {
        raw[rule.out_ch as usize][rule.in_ch as usize] = rule.coeff;
    }
    normalize_mapping(&mut raw);

    // Keep only channels enabled in the actual sets; transpose when the
    // table is applied in the upmix direction.
    let mut result: ChannelMatrix = [[0.0; CHANNEL_POSITION_COUNT]; CHANNEL_POSITION_COUNT];
    for out_ch in out_set.positions() {
        for in_ch in in_set.positions() {
            result[out_ch as usize][in_ch as usize] = if downmixing {
                raw[out_ch as usize][in_ch as usize]
            } else {
                raw[in_ch as usize][out_ch as usize]
            };
        }
    }
    normalize_mapping(&mut result);

    result
}

fn fallback_mapping() -> ChannelMatrix {
    debug!("channel mapper: selected mapping table: [diagonal]");
    let mut matrix: ChannelMatrix = [[0.0; CHANNEL_POSITION_COUNT]; CHANNEL_POSITION_COUNT];
    for (ch, row) in matrix.iter_mut().enumerate() {
        row[ch] = 1.0;
    }
    matrix
}

fn combine_mappings(prev: &ChannelMatrix, next: &ChannelMatrix) -> ChannelMatrix {
    let mut combined: ChannelMatrix = [[0.0; CHANNEL_POSITION_COUNT]; CHANNEL_POSITION_COUNT];

    for out_ch in 0..CHANNEL_POSITION_COUNT {
        for mid_ch in 0..CHANNEL_POSITION_COUNT {
            let next_coeff = next[out_ch][mid_ch];
            if next_coeff == 0.0 {
                continue;
            }
            for in_ch in 0..CHANNEL_POSITION_COUNT {
                let prev_coeff = prev[mid_ch][in_ch];
                if prev_coeff == 0.0 {
                    continue;
                }
                combined[out_ch][in_ch] += next_coeff * prev_coeff;
            }
        }
    }

    normalize_mapping(&mut combined);
    combined
}

fn normalize_mapping(matrix: &mut ChannelMatrix) {
    for row in matrix.iter_mut() {
        let sum: f32 = row.iter().sum();
        if sum == 0.0 {
            continue;
        }
        for coeff in row.iter_mut() {
            *coeff /= sum;
        }
    }
}

/// Frame reader stage applying a channel mapper.
pub struct ChannelMapperReader {
    reader: Box<dyn FrameReader>,
    mapper: ChannelMapper,
    in_spec: SampleSpec,
    out_spec: SampleSpec,
    scratch: Frame,
}

impl ChannelMapperReader {
    pub fn new(reader: Box<dyn FrameReader>, in_spec: SampleSpec, out_spec: SampleSpec) -> Self {
        Self {
            reader,
            mapper: ChannelMapper::new(in_spec.channel_set(), out_spec.channel_set()),
            in_spec,
            out_spec,
            scratch: Frame::new(),
        }
    }
}

impl FrameReader for ChannelMapperReader {
    fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
        self.reader.read(&mut self.scratch, duration)?;
        debug_assert_eq!(
            self.scratch.num_samples(),
            duration * self.in_spec.num_channels()
        );

        frame.prepare(duration * self.out_spec.num_channels());
        self.mapper.map(self.scratch.samples(), frame.samples_mut());

        frame.add_flags(self.scratch.flags());
        frame.set_capture_timestamp(self.scratch.capture_timestamp());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::masks;

    #[test]
    fn test_identity_is_noop() {
        let mapper = ChannelMapper::new(ChannelSet::stereo(), ChannelSet::stereo());
        let input = [0.1, 0.2, 0.3, 0.4];
        let mut output = [0.0; 4];
        mapper.map(&input, &mut output);
        assert_eq!(input, output);
    }

    #[test]
    fn test_mono_to_stereo_upmix() {
        let mapper = ChannelMapper::new(ChannelSet::mono(), ChannelSet::stereo());
        let input = [0.5, 0.25];
        let mut output = [0.0; 4];
        mapper.map(&input, &mut output);

        // FC feeds both L and R at full weight after row normalization.
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 0.25).abs() < 1e-6);
        assert!((output[3] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_to_mono_downmix() {
        let mapper = ChannelMapper::new(ChannelSet::stereo(), ChannelSet::mono());
        let input = [0.4, 0.8];
        let mut output = [0.0; 1];
        mapper.map(&input, &mut output);

        // Equal weights after normalization: (0.4 + 0.8) / 2.
        assert!((output[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_5_1_to_stereo_row_weights() {
        let in_set = ChannelSet::surround(masks::SURROUND_5_1);
        let mapper = ChannelMapper::new(in_set, ChannelSet::stereo());

        // Frame order of 5.1: FL FR FC LFE BL BR. Row weights must be
        // normalized and symmetric between left and right. The chain is
        // 5.1 -> 3.1 -> 2.1: FL 0.343146, FC 0.414214, BL 0.242641.
        let fl = mapper.coefficient(0, 0);
        let fc_l = mapper.coefficient(0, 2);
        let bl = mapper.coefficient(0, 4);
        let fr = mapper.coefficient(1, 1);
        let fc_r = mapper.coefficient(1, 2);
        let br = mapper.coefficient(1, 5);

        assert!((fl - 0.343146).abs() < 1e-5);
        assert!((fc_l - 0.414214).abs() < 1e-5);
        assert!((bl - 0.242641).abs() < 1e-5);
        assert!(fl > bl && bl > 0.0);
        assert!((fl - fr).abs() < 1e-6);
        assert!((fc_l - fc_r).abs() < 1e-6);
        assert!((bl - br).abs() < 1e-6);

        // No cross-bleed from the right side into the left.
        assert_eq!(mapper.coefficient(0, 1), 0.0);
        assert_eq!(mapper.coefficient(0, 5), 0.0);
    }

    #[test]
    fn test_5_1_2_to_stereo_weighted_sums() {
        // The chain is 5.1.2 -> 3.1 -> 2.1, filtered to stereo. With the
        // table coefficients this gives, per output row:
        //   L = 0.242641*FL + 0.414214*FC + 0.171573*BL + 0.171573*TML
        let in_set = ChannelSet::surround(masks::SURROUND_5_1_2);
        let mapper = ChannelMapper::new(in_set, ChannelSet::stereo());

        // Frame order of 5.1.2: FL FR FC LFE BL BR TML TMR.
        let expected_l = [0.242641, 0.0, 0.414214, 0.0, 0.171573, 0.0, 0.171573, 0.0];
        let expected_r = [0.0, 0.242641, 0.414214, 0.0, 0.0, 0.171573, 0.0, 0.171573];

        for (in_index, &expected) in expected_l.iter().enumerate() {
            let got = mapper.coefficient(0, in_index);
            assert!(
                (got - expected).abs() < 1e-5,
                "L coefficient {in_index}: got {got}, expected {expected}"
            );
        }
        for (in_index, &expected) in expected_r.iter().enumerate() {
            let got = mapper.coefficient(1, in_index);
            assert!(
                (got - expected).abs() < 1e-5,
                "R coefficient {in_index}: got {got}, expected {expected}"
            );
        }

        // Unit impulse on every input channel sums to unity output.
        let input = [1.0; 8];
        let mut output = [0.0; 2];
        mapper.map(&input, &mut output);
        assert!((output[0] - 1.0).abs() < 1e-5);
        assert!((output[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_stereo_to_5_1_upmix_transposes() {
        let out_set = ChannelSet::surround(masks::SURROUND_5_1);
        let mapper = ChannelMapper::new(ChannelSet::stereo(), out_set);

        // FL output comes from FL input; FC output mixes both.
        assert!(mapper.coefficient(0, 0) > 0.0);
        assert_eq!(mapper.coefficient(0, 1), 0.0);
        assert!(mapper.coefficient(2, 0) > 0.0);
        assert!(mapper.coefficient(2, 1) > 0.0);
    }
}

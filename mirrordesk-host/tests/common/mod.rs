//! A tiny hand-built H.264 stream: one 16×16 macroblock per picture.
//!
//! The key frame is a single I_PCM macroblock, so its pixels are exact;
//! the delta frame skips that macroblock and repeats the picture.

#![allow(dead_code)]

/// MSB-first bit writer for RBSP payloads.
#[derive(Default)]
struct Bits {
    out: Vec<u8>,
    cur: u8,
    used: u8,
}

impl Bits {
    fn bit(&mut self, set: bool) {
        self.cur = self.cur << 1 | set as u8;
        self.used += 1;
        if self.used == 8 {
            self.out.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    fn u(&mut self, bits: u32, value: u32) {
        for i in (0..bits).rev() {
            self.bit((value >> i) & 1 == 1);
        }
    }

    /// Unsigned Exp-Golomb.
    fn ue(&mut self, value: u32) {
        let coded = value + 1;
        let len = 32 - coded.leading_zeros();
        self.u(len - 1, 0);
        self.u(len, coded);
    }

    fn align_zero(&mut self) {
        while self.used != 0 {
            self.bit(false);
        }
    }

    /// rbsp_trailing_bits.
    fn finish(mut self) -> Vec<u8> {
        self.bit(true);
        self.align_zero();
        self.out
    }
}

/// Wrap an RBSP in a start code and NAL header, inserting emulation
/// prevention bytes.
fn nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 1, header];
    let mut zeros = 0;
    for &b in rbsp {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Baseline SPS for a 16×16 picture that never reorders.
pub fn sps() -> Vec<u8> {
    let mut b = Bits::default();
    b.u(8, 66); // profile_idc
    b.u(8, 0); // constraint flags
    b.u(8, 30); // level_idc
    b.ue(0); // seq_parameter_set_id
    b.ue(0); // log2_max_frame_num_minus4
    b.ue(2); // pic_order_cnt_type
    b.ue(1); // max_num_ref_frames
    b.u(1, 0); // gaps_in_frame_num_value_allowed_flag
    b.ue(0); // pic_width_in_mbs_minus1
    b.ue(0); // pic_height_in_map_units_minus1
    b.u(1, 1); // frame_mbs_only_flag
    b.u(1, 1); // direct_8x8_inference_flag
    b.u(1, 0); // frame_cropping_flag
    b.u(1, 1); // vui_parameters_present_flag
    b.u(8, 0); // aspect, overscan, signal type, chroma loc, timing, both hrd, pic_struct
    b.u(1, 1); // bitstream_restriction_flag
    b.u(1, 1); // motion_vectors_over_pic_boundaries_flag
    b.ue(0); // max_bytes_per_pic_denom
    b.ue(0); // max_bits_per_mb_denom
    b.ue(11); // log2_max_mv_length_horizontal
    b.ue(11); // log2_max_mv_length_vertical
    b.ue(0); // max_num_reorder_frames
    b.ue(1); // max_dec_frame_buffering
    nal(0x67, &b.finish())
}

/// CAVLC PPS with deblocking control.
pub fn pps() -> Vec<u8> {
    let mut b = Bits::default();
    b.ue(0); // pic_parameter_set_id
    b.ue(0); // seq_parameter_set_id
    b.u(1, 0); // entropy_coding_mode_flag
    b.u(1, 0); // bottom_field_pic_order_in_frame_present_flag
    b.ue(0); // num_slice_groups_minus1
    b.ue(0); // num_ref_idx_l0_default_active_minus1
    b.ue(0); // num_ref_idx_l1_default_active_minus1
    b.u(1, 0); // weighted_pred_flag
    b.u(2, 0); // weighted_bipred_idc
    b.ue(0); // pic_init_qp_minus26 (se 0)
    b.ue(0); // pic_init_qs_minus26 (se 0)
    b.ue(0); // chroma_qp_index_offset (se 0)
    b.u(1, 1); // deblocking_filter_control_present_flag
    b.u(1, 0); // constrained_intra_pred_flag
    b.u(1, 0); // redundant_pic_cnt_present_flag
    nal(0x68, &b.finish())
}

/// Parameter sets as the encoder's config record carries them.
pub fn config() -> Vec<u8> {
    [sps(), pps()].concat()
}

/// IDR picture filled with one YCbCr colour.
pub fn key_frame(y: u8, cb: u8, cr: u8) -> Vec<u8> {
    let mut b = Bits::default();
    b.ue(0); // first_mb_in_slice
    b.ue(7); // slice_type: I, all slices
    b.ue(0); // pic_parameter_set_id
    b.u(4, 0); // frame_num
    b.ue(0); // idr_pic_id
    b.u(1, 0); // no_output_of_prior_pics_flag
    b.u(1, 0); // long_term_reference_flag
    b.ue(0); // slice_qp_delta (se 0)
    b.ue(1); // disable_deblocking_filter_idc
    b.ue(25); // mb_type: I_PCM
    b.align_zero();
    for _ in 0..256 {
        b.u(8, y.into());
    }
    for _ in 0..64 {
        b.u(8, cb.into());
    }
    for _ in 0..64 {
        b.u(8, cr.into());
    }
    nal(0x65, &b.finish())
}

/// P picture that skips its only macroblock.
pub fn delta_frame(frame_num: u32) -> Vec<u8> {
    let mut b = Bits::default();
    b.ue(0); // first_mb_in_slice
    b.ue(5); // slice_type: P, all slices
    b.ue(0); // pic_parameter_set_id
    b.u(4, frame_num);
    b.u(1, 0); // num_ref_idx_active_override_flag
    b.u(1, 0); // ref_pic_list_modification_flag_l0
    b.u(1, 0); // adaptive_ref_pic_marking_mode_flag
    b.ue(0); // slice_qp_delta (se 0)
    b.ue(1); // disable_deblocking_filter_idc
    b.ue(1); // mb_skip_run
    nal(0x41, &b.finish())
}

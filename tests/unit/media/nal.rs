use super::*;

#[test]
fn avcc_to_annexb_basic() {
    let avcc = [0x00, 0x00, 0x00, 0x05, 0x67, 0x01, 0x02, 0x03, 0x04];
    let annexb = avcc_to_annexb(&avcc, 4);
    assert_eq!(&annexb[..4], &START_CODE);
    assert_eq!(&annexb[4..], &[0x67, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn avcc_truncated_unit_is_dropped() {
    let avcc = [0x00, 0x00, 0x00, 0x09, 0x65, 0x01];
    assert!(avcc_to_annexb(&avcc, 4).is_empty());
}

#[test]
fn nal_type_parsing() {
    assert_eq!(NalType::from(0x67), NalType::Sps);
    assert_eq!(NalType::from(0x68), NalType::Pps);
    assert_eq!(NalType::from(0x65), NalType::Idr);
    assert_eq!(NalType::from(0x41), NalType::Slice);
}

#[test]
fn split_handles_three_and_four_byte_start_codes() {
    let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0, 0, 0, 1, 0x65, 0xCC];
    let units = split_annexb(&data);
    assert_eq!(units, vec![&[0x67, 0xAA][..], &[0x68, 0xBB][..], &[0x65, 0xCC][..]]);
}

#[test]
fn annexb_to_avcc_strips_parameter_sets() {
    let data = prepend_sps_pps(&[0x67, 1], &[0x68, 2], &[0, 0, 0, 1, 0x65, 0xEE, 0xFF]);
    let avcc = annexb_to_avcc(&data);
    assert_eq!(avcc, vec![0, 0, 0, 3, 0x65, 0xEE, 0xFF]);
}

#[test]
fn parameter_sets_and_idr_detection() {
    let data = prepend_sps_pps(&[0x67, 1, 2], &[0x68, 3], &[0, 0, 0, 1, 0x65, 0x10]);
    let (sps, pps) = find_parameter_sets(&data);
    assert_eq!(sps.as_deref(), Some(&[0x67, 1, 2][..]));
    assert_eq!(pps.as_deref(), Some(&[0x68, 3][..]));
    assert!(contains_idr(&data));
    assert!(!contains_idr(&[0, 0, 0, 1, 0x41, 0x10]));
}

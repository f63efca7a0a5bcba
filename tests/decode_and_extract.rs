mod common;

use common::{FileBuilder, ITEM, SEQUENCE_DELIMITATION_ITEM, ct_slice, structure_set, text};
use dicom::core::Tag;
use dicom_dictionary_std::tags;
use dicom_mpr::{
    DecodeError, DecodingMode, ExtractionError, SampleBuffer, decode, extract_image,
    image_slice::try_extract_image,
    structure_set::{ValidationIssue, extract_structures, validate_structure_set},
};

/// Explicit VR little endian element with a 2-byte length
fn explicit(out: &mut Vec<u8>, tag: Tag, vr: &[u8; 2], value: &[u8]) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
    out.extend_from_slice(vr);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
}

fn delimiter(out: &mut Vec<u8>, tag: Tag, length: u32) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
}

#[test]
fn minimal_implicit_stream_yields_a_4x4_signed_image() {
    let pixels: Vec<u8> = (-8i16..8).flat_map(i16::to_le_bytes).collect();
    let bytes = FileBuilder::new()
        .us(tags::ROWS, 4)
        .us(tags::COLUMNS, 4)
        .us(tags::BITS_ALLOCATED, 16)
        .us(tags::PIXEL_REPRESENTATION, 1)
        .bytes(tags::PIXEL_DATA, pixels)
        .build();

    let dataset = decode(&bytes).unwrap();
    assert_eq!(dataset.mode(), DecodingMode::ImplicitVrLittleEndian);
    assert!(dataset.contains(tags::TRANSFER_SYNTAX_UID));
    assert!(dataset.contains(tags::PIXEL_DATA));

    let image = extract_image(&dataset).unwrap();
    assert_eq!((image.rows, image.columns), (4, 4));
    assert!(image.signed);
    assert_eq!(image.bits_stored, 16);
    match &image.samples {
        SampleBuffer::I16(samples) => {
            assert_eq!(samples.len(), 16);
            assert_eq!(samples[0], -8);
            assert_eq!(samples[15], 7);
        }
        other => panic!("unexpected sample buffer {other:?}"),
    }
}

#[test]
fn ct_slice_geometry() {
    let dataset = decode(&ct_slice(2, 3, 12.5, 4, -1000)).unwrap();
    let image = try_extract_image(&dataset).unwrap();
    assert_eq!(image.position_mm, [-10.0, -20.0, 12.5]);
    assert_eq!(image.spacing_mm, [1.0, 1.0]);
    assert_eq!(image.instance_number, Some(4));
    assert_eq!(image.normal(), [0.0, 0.0, 1.0]);
    assert_eq!(image.hu_samples(), vec![-1000; 6]);
}

#[test]
fn missing_rows_is_reported() {
    let bytes = FileBuilder::new()
        .us(tags::COLUMNS, 4)
        .us(tags::BITS_ALLOCATED, 16)
        .bytes(tags::PIXEL_DATA, vec![0; 32])
        .build();
    let dataset = decode(&bytes).unwrap();
    assert!(matches!(
        try_extract_image(&dataset),
        Err(ExtractionError::MissingRequiredTag(tag)) if tag == tags::ROWS
    ));
    assert!(extract_image(&dataset).is_none());
}

#[test]
fn zero_rows_is_a_mismatch() {
    let bytes = FileBuilder::new()
        .us(tags::ROWS, 0)
        .us(tags::COLUMNS, 4)
        .us(tags::BITS_ALLOCATED, 16)
        .bytes(tags::PIXEL_DATA, Vec::new())
        .build();
    let dataset = decode(&bytes).unwrap();
    assert!(matches!(
        try_extract_image(&dataset),
        Err(ExtractionError::TypeMismatch { tag, .. }) if tag == tags::ROWS
    ));

    let dataset = decode(&ct_slice(3, 0, 0.0, 1, 0)).unwrap();
    assert!(matches!(
        try_extract_image(&dataset),
        Err(ExtractionError::TypeMismatch { tag, .. }) if tag == tags::COLUMNS
    ));
}

#[test]
fn encapsulated_pixel_data_is_unsupported() {
    let mut bytes = vec![0; 128];
    bytes.extend_from_slice(b"DICM");
    // JPEG baseline: the body is explicit VR, pixel data is fragmented
    explicit(
        &mut bytes,
        tags::TRANSFER_SYNTAX_UID,
        b"UI",
        b"1.2.840.10008.1.2.4.50",
    );
    explicit(&mut bytes, tags::MODALITY, b"CS", &text("CT"));
    explicit(&mut bytes, tags::ROWS, b"US", &2u16.to_le_bytes());
    explicit(&mut bytes, tags::COLUMNS, b"US", &2u16.to_le_bytes());
    explicit(&mut bytes, tags::BITS_ALLOCATED, b"US", &8u16.to_le_bytes());
    bytes.extend_from_slice(&tags::PIXEL_DATA.group().to_le_bytes());
    bytes.extend_from_slice(&tags::PIXEL_DATA.element().to_le_bytes());
    bytes.extend_from_slice(b"OB\0\0");
    bytes.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    delimiter(&mut bytes, ITEM, 0);
    delimiter(&mut bytes, ITEM, 4);
    bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
    delimiter(&mut bytes, SEQUENCE_DELIMITATION_ITEM, 0);

    let dataset = decode(&bytes).unwrap();
    assert_eq!(dataset.mode(), DecodingMode::ExplicitVrLittleEndian);
    assert!(dataset.get(tags::PIXEL_DATA).unwrap().is_undefined_length());
    assert!(matches!(
        try_extract_image(&dataset),
        Err(ExtractionError::UnsupportedConstruct(tag)) if tag == tags::PIXEL_DATA
    ));
    assert!(extract_image(&dataset).is_none());
}

#[test]
fn truncated_files_never_panic() {
    let bytes = ct_slice(4, 4, 0.0, 1, 40);
    for cut in 0..bytes.len() {
        match decode(&bytes[..cut]) {
            Ok(_) => {}
            Err(
                DecodeError::InvalidFormat
                | DecodeError::UnexpectedEndOfInput { .. }
                | DecodeError::CorruptedData { .. },
            ) => {}
            Err(e) => panic!("unexpected error at {cut}: {e}"),
        }
    }
}

#[test]
fn structure_set_round_trip() {
    let dataset = decode(&structure_set("Liver", &[0.0, 1.0, 2.0])).unwrap();
    assert!(validate_structure_set(&dataset).is_empty());

    let structures = extract_structures(&dataset).unwrap();
    assert_eq!(structures.len(), 1);
    let liver = &structures[0];
    assert_eq!(liver.name, "Liver");
    assert_eq!(liver.display_color, [0, 255, 0]);
    assert_eq!(liver.contours.len(), 3);
    assert!(liver.contours.iter().all(|c| c.closed && c.points.len() == 4));
    assert_eq!(liver.contours[2].slice_position_mm, 2.0);
}

fn contour(data: &str) -> Vec<u8> {
    FileBuilder::new()
        .text(tags::CONTOUR_GEOMETRIC_TYPE, "CLOSED_PLANAR")
        .text(tags::CONTOUR_DATA, data)
        .body()
}

fn roi_contours(roi: i64, contours: Vec<Vec<u8>>) -> Vec<u8> {
    FileBuilder::new()
        .text(tags::ROI_DISPLAY_COLOR, "0\\0\\255")
        .sequence(tags::CONTOUR_SEQUENCE, contours)
        .text(tags::REFERENCED_ROI_NUMBER, &roi.to_string())
        .body()
}

#[test]
fn validation_keeps_partially_valid_structures() {
    let square = "0\\0\\5\\4\\0\\5\\4\\4\\5";
    let roi = FileBuilder::new()
        .text(tags::ROI_NUMBER, "1")
        .text(tags::ROI_NAME, "Liver")
        .body();
    let bytes = FileBuilder::new()
        .text(tags::MODALITY, "CT")
        .sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi])
        .sequence(
            tags::ROI_CONTOUR_SEQUENCE,
            vec![
                roi_contours(1, vec![contour(square), contour("1\\2\\3\\4")]),
                roi_contours(9, vec![contour(square)]),
            ],
        )
        .build();
    let dataset = decode(&bytes).unwrap();

    let issues = validate_structure_set(&dataset);
    assert_eq!(issues.len(), 3, "{issues:?}");
    assert!(issues.contains(&ValidationIssue::WrongModality("CT".to_string())));
    assert!(issues.contains(&ValidationIssue::UnknownRoiReference(9)));
    assert!(issues.iter().any(|issue| matches!(
        issue,
        ValidationIssue::MalformedContour { roi: 1, index: 1, .. }
    )));

    let structures = extract_structures(&dataset).unwrap();
    assert_eq!(structures.len(), 2);
    let liver = &structures[0];
    assert_eq!((liver.number, liver.name.as_str()), (1, "Liver"));
    assert_eq!(liver.display_color, [0, 0, 255]);
    assert_eq!(liver.contours.len(), 1);
    assert_eq!(liver.contours[0].points.len(), 3);
    assert_eq!(liver.contours[0].slice_position_mm, 5.0);

    let orphan = &structures[1];
    assert_eq!((orphan.number, orphan.name.as_str()), (9, "ROI 9"));
    assert_eq!(orphan.contours.len(), 1);
}

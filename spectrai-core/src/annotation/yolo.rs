use std::{fmt, fs, io, path::Path};

use glam::Vec2;
use snafu::{ResultExt, ensure};
use tracing::*;

use crate::{
    analysis::bbox::{Bbox, ImageSize},
    annotation::box_manager::BoxRecord,
    consts::{NORMALIZED_TOLERANCE, YOLO_PRECISION},
    error::{
        InvalidGeometrySnafu, IoReadSnafu, IoWriteSnafu, MalformedAnnotationFileSnafu,
        SpectraiError,
    },
};

/// One row of a YOLO label file, normalized to the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloLine {
    pub label_id: usize,
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl YoloLine {
    /// Normalizes a pixel-space record against `size`.
    ///
    /// The box is clipped to the image first so every value lands in `[0, 1]`; a box
    /// with nothing left inside the image is an [`SpectraiError::InvalidGeometry`].
    pub fn from_record(record: &BoxRecord, size: ImageSize) -> Result<Self, SpectraiError> {
        ensure_drawable(size)?;

        let clipped = Bbox::new_from_min_size(
            Vec2::new(record.x, record.y),
            Vec2::new(record.width, record.height),
        )
        .clamp(Vec2::ZERO, size.as_vec2());
        ensure!(
            !clipped.is_degenerate(),
            InvalidGeometrySnafu {
                message: format!(
                    "box at ({}, {}) size {}x{} lies outside the {}x{} image",
                    record.x, record.y, record.width, record.height, size.width, size.height
                ),
            }
        );

        let (w, h) = (size.width as f32, size.height as f32);
        let center = clipped.center();
        Ok(Self {
            label_id: record.label_id,
            x_center: center.x / w,
            y_center: center.y / h,
            width: clipped.width() / w,
            height: clipped.height() / h,
        })
    }

    /// Back to pixel space. Ids are left for the manager to assign.
    pub fn to_record(&self, size: ImageSize) -> BoxRecord {
        let (w, h) = (size.width as f32, size.height as f32);
        let width = self.width * w;
        let height = self.height * h;
        BoxRecord {
            box_id: None,
            x: self.x_center * w - width / 2.0,
            y: self.y_center * h - height / 2.0,
            width,
            height,
            label_id: self.label_id,
        }
    }

    /// Parses one row. Blank rows and `#` comments yield `None`.
    pub fn parse(line: &str, line_num: usize, path: &str) -> Result<Option<Self>, SpectraiError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        ensure!(
            tokens.len() == 5,
            MalformedAnnotationFileSnafu {
                path,
                line: line_num,
                message: format!("expected 5 values, found {}", tokens.len()),
            }
        );

        let label_id = tokens[0].parse::<usize>().map_err(|_| {
            SpectraiError::MalformedAnnotationFile {
                path: path.to_string(),
                line: line_num,
                message: format!("invalid class id `{}`", tokens[0]),
            }
        })?;

        let row = Self {
            label_id,
            x_center: parse_value(tokens[1], "x_center", path, line_num)?,
            y_center: parse_value(tokens[2], "y_center", path, line_num)?,
            width: parse_value(tokens[3], "width", path, line_num)?,
            height: parse_value(tokens[4], "height", path, line_num)?,
        };

        ensure!(
            row.width > 0.0 && row.height > 0.0,
            MalformedAnnotationFileSnafu {
                path,
                line: line_num,
                message: "width and height must be positive",
            }
        );
        Ok(Some(row))
    }
}

impl fmt::Display for YoloLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.p$} {:.p$} {:.p$} {:.p$}",
            self.label_id,
            self.x_center,
            self.y_center,
            self.width,
            self.height,
            p = YOLO_PRECISION
        )
    }
}

fn parse_value(token: &str, field: &str, path: &str, line_num: usize) -> Result<f32, SpectraiError> {
    let value = token
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| SpectraiError::MalformedAnnotationFile {
            path: path.to_string(),
            line: line_num,
            message: format!("invalid {field} `{token}`"),
        })?;

    ensure!(
        (-NORMALIZED_TOLERANCE..=1.0 + NORMALIZED_TOLERANCE).contains(&value),
        MalformedAnnotationFileSnafu {
            path,
            line: line_num,
            message: format!("{field} {value} is outside [0, 1]"),
        }
    );
    Ok(value)
}

fn ensure_drawable(size: ImageSize) -> Result<(), SpectraiError> {
    ensure!(
        !size.is_empty(),
        InvalidGeometrySnafu {
            message: format!(
                "cannot normalize against a {}x{} image",
                size.width, size.height
            ),
        }
    );
    Ok(())
}

/// Renders records as YOLO rows, one per line with a trailing newline.
///
/// Boxes are clipped to the image. Boxes lying wholly outside it are skipped.
pub fn format_annotations(records: &[BoxRecord], size: ImageSize) -> Result<String, SpectraiError> {
    ensure_drawable(size)?;

    let mut out = String::new();
    for record in records {
        let line = match YoloLine::from_record(record, size) {
            Ok(line) => line,
            Err(err @ SpectraiError::InvalidGeometry { .. }) => {
                warn!("Skipping box with label {}: {}", record.label_id, err);
                continue;
            }
            Err(err) => return Err(err),
        };
        out.push_str(&line.to_string());
        out.push('\n');
    }
    Ok(out)
}

/// Parses a whole label file into pixel-space records.
pub fn parse_annotations(
    content: &str,
    size: ImageSize,
    path: &str,
) -> Result<Vec<BoxRecord>, SpectraiError> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if let Some(row) = YoloLine::parse(line, idx + 1, path)? {
            records.push(row.to_record(size));
        }
    }
    Ok(records)
}

/// Reads the label file at `path`. A missing file means the image has no boxes.
pub fn read_annotation_file<P: AsRef<Path>>(
    path: P,
    size: ImageSize,
) -> Result<Vec<BoxRecord>, SpectraiError> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy().to_string();

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("No annotation file at {}", path.display());
            return Ok(Vec::new());
        }
        Err(err) => return Err(err).context(IoReadSnafu { path: path_str }),
    };

    let records = parse_annotations(&content, size, &path_str)?;
    debug!("Read {} boxes from {}", records.len(), path.display());
    Ok(records)
}

pub fn write_annotation_file<P: AsRef<Path>>(
    path: P,
    records: &[BoxRecord],
    size: ImageSize,
) -> Result<(), SpectraiError> {
    let path = path.as_ref();
    let content = format_annotations(records, size)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(IoWriteSnafu {
            path: parent.to_string_lossy(),
        })?;
    }
    fs::write(path, content).context(IoWriteSnafu {
        path: path.to_string_lossy(),
    })?;
    debug!("Wrote {} boxes to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(x: f32, y: f32, width: f32, height: f32, label_id: usize) -> BoxRecord {
        BoxRecord {
            box_id: None,
            x,
            y,
            width,
            height,
            label_id,
        }
    }

    #[test]
    fn test_format_known_box() {
        let size = ImageSize::new(1000, 500);
        let content = format_annotations(&[record(100.0, 50.0, 200.0, 150.0, 0)], size).unwrap();
        assert_eq!(content, "0 0.200000 0.250000 0.200000 0.300000\n");
    }

    #[test]
    fn test_parse_restores_pixels() {
        let size = ImageSize::new(1000, 500);
        let records =
            parse_annotations("0 0.200000 0.250000 0.200000 0.300000\n", size, "a.txt").unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert!((r.x - 100.0).abs() < 1e-3);
        assert!((r.y - 50.0).abs() < 1e-3);
        assert!((r.width - 200.0).abs() < 1e-3);
        assert!((r.height - 150.0).abs() < 1e-3);
        assert_eq!(r.box_id, None);
    }

    #[test]
    fn test_parse_tabs_comments_and_blank_lines() {
        let size = ImageSize::new(100, 100);
        let content = "# exported\n\n3\t0.5\t0.5\t0.2\t0.4\n  \n1 0.1 0.1 0.1 0.1";
        let records = parse_annotations(content, size, "a.txt").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label_id, 3);
        assert_eq!(records[1].label_id, 1);
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let size = ImageSize::new(100, 100);
        let cases = [
            ("0 0.5 0.5 0.2\n", "expected 5 values"),
            ("x 0.5 0.5 0.2 0.2\n", "invalid class id"),
            ("0 0.5 nan 0.2 0.2\n", "invalid y_center"),
            ("0 0.5 0.5 1.5 0.2\n", "outside [0, 1]"),
            ("0 0.5 0.5 0.0 0.2\n", "must be positive"),
        ];
        for (bad, expected) in cases {
            let content = format!("0 0.5 0.5 0.2 0.2\n{bad}");
            match parse_annotations(&content, size, "a.txt").unwrap_err() {
                SpectraiError::MalformedAnnotationFile { line, message, .. } => {
                    assert_eq!(line, 2);
                    assert!(message.contains(expected), "{message}");
                }
                other => panic!("unexpected error {other}"),
            }
        }
    }

    #[test]
    fn test_parse_accepts_values_within_tolerance() {
        let size = ImageSize::new(100, 100);
        assert!(parse_annotations("0 1.00005 0.5 0.2 0.2", size, "a.txt").is_ok());
        assert!(parse_annotations("0 -0.00005 0.5 0.2 0.2", size, "a.txt").is_ok());
    }

    #[test]
    fn test_format_rejects_empty_image() {
        let err = format_annotations(&[record(0.0, 0.0, 1.0, 1.0, 0)], ImageSize::new(0, 10))
            .unwrap_err();
        assert!(matches!(err, SpectraiError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_format_clips_to_image() {
        let size = ImageSize::new(100, 100);
        let content = format_annotations(&[record(95.0, 10.0, 20.0, 20.0, 1)], size).unwrap();
        assert_eq!(content, "1 0.975000 0.200000 0.050000 0.200000\n");

        let records = parse_annotations(&content, size, "a.txt").unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].x - 95.0).abs() < 1e-3);
        assert!((records[0].width - 5.0).abs() < 1e-3);
        assert!((records[0].height - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_format_skips_boxes_outside_image() {
        let size = ImageSize::new(100, 100);
        let records = [
            record(150.0, 150.0, 20.0, 20.0, 0),
            record(10.0, 10.0, 20.0, 20.0, 2),
        ];
        let content = format_annotations(&records, size).unwrap();
        assert_eq!(content, "2 0.200000 0.200000 0.200000 0.200000\n");

        let err = YoloLine::from_record(&records[0], size).unwrap_err();
        assert!(matches!(err, SpectraiError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("spectrai-yolo-{}", uuid::Uuid::new_v4()));
        let path = dir.join("labels").join("sample.txt");
        let size = ImageSize::new(640, 480);

        // Missing file means no boxes
        assert!(read_annotation_file(&path, size).unwrap().is_empty());

        let records = vec![
            record(12.0, 34.0, 56.0, 78.0, 2),
            record(300.0, 200.0, 100.0, 50.0, 7),
        ];
        write_annotation_file(&path, &records, size).unwrap();
        let first = fs::read_to_string(&path).unwrap();

        let loaded = read_annotation_file(&path, size).unwrap();
        assert_eq!(loaded.len(), 2);
        for (a, b) in records.iter().zip(&loaded) {
            assert_eq!(a.label_id, b.label_id);
            assert!((a.x - b.x).abs() < 0.01);
            assert!((a.y - b.y).abs() < 0.01);
            assert!((a.width - b.width).abs() < 0.01);
            assert!((a.height - b.height).abs() < 0.01);
        }

        // Re-saving what was loaded gives the same text
        write_annotation_file(&path, &loaded, size).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), first);

        fs::remove_dir_all(&dir).ok();
    }
}

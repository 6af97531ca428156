use chrono::{DateTime, Local, TimeZone};
use mu_storage::{MeasurementSink, RotatingCsvStorage, device_dir, file_name};

fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .earliest()
        .expect("local time")
}

fn header() -> Vec<String> {
    vec!["temp_external".to_string(), "soil_moisture".to_string()]
}

#[test]
fn file_name_uses_prefix_and_time() {
    assert_eq!(
        file_name("rpi0_mu_CYB1", local(2024, 3, 5, 7, 8)),
        "rpi0_mu_CYB1_2024_03_05-07_08_00.csv"
    );
}

#[test]
fn header_and_rows_are_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let start = local(2024, 3, 5, 7, 8);
    let mut storage =
        RotatingCsvStorage::open(dir.path().join("nested"), "rpi0", header(), 12, start)
            .expect("open");
    storage
        .write_row(local(2024, 3, 5, 7, 9), &[28.49, 264.0])
        .expect("write");

    let content = std::fs::read_to_string(storage.current_path()).expect("read");
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("datetime,temp_external,soil_moisture"));
    assert_eq!(lines.next(), Some("2024-03-05 07:09:00,28.49,264"));
    assert_eq!(lines.next(), None);
}

#[test]
fn rotates_once_per_rotation_hour() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut storage =
        RotatingCsvStorage::open(dir.path(), "rpi0", header(), 12, local(2024, 3, 5, 11, 30))
            .expect("open");
    let first = storage.current_path().to_path_buf();

    assert!(!storage.rotate_if_due(local(2024, 3, 5, 11, 59)).expect("rotate"));
    assert!(storage.rotate_if_due(local(2024, 3, 5, 12, 0)).expect("rotate"));
    assert!(!storage.rotate_if_due(local(2024, 3, 5, 12, 30)).expect("rotate"));
    assert!(!storage.rotate_if_due(local(2024, 3, 5, 13, 0)).expect("rotate"));
    assert!(storage.rotate_if_due(local(2024, 3, 6, 0, 5)).expect("rotate"));

    assert_ne!(storage.current_path(), first.as_path());
    let files = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert_eq!(files, 3);
}

#[test]
fn start_inside_rotation_hour_does_not_rotate_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut storage =
        RotatingCsvStorage::open(dir.path(), "rpi0", header(), 12, local(2024, 3, 5, 0, 10))
            .expect("open");
    assert!(!storage.rotate_if_due(local(2024, 3, 5, 0, 50)).expect("rotate"));
}

#[test]
fn invalid_rotation_period_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(
        RotatingCsvStorage::open(dir.path(), "rpi0", header(), 5, local(2024, 3, 5, 0, 10))
            .is_err()
    );
}

#[test]
fn write_rotates_on_row_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut storage =
        RotatingCsvStorage::open(dir.path(), "rpi0", header(), 12, local(2024, 3, 5, 11, 30))
            .expect("open");
    let first = storage.current_path().to_path_buf();

    storage
        .write_row(local(2024, 3, 5, 12, 1), &[21.0, 300.0])
        .expect("write");
    assert_ne!(storage.current_path(), first.as_path());
    let content = std::fs::read_to_string(storage.current_path()).expect("read");
    assert!(content.ends_with("2024-03-05 12:01:00,21,300\n"));
    assert!(storage.current_path().ends_with("rpi0_2024_03_05-12_01_00.csv"));
}

#[test]
fn device_dir_is_suffixed_with_id() {
    let base = std::path::Path::new("/data/measurements");
    assert_eq!(
        device_dir(base, Some(21)),
        std::path::PathBuf::from("/data/measurements (21)")
    );
    assert_eq!(
        device_dir(base, None),
        std::path::PathBuf::from("/data/measurements (ID NA)")
    );
}

//! Page-level inspection of Ogg files
//!
//! Walks every page of a file without decoding anything and reports where
//! each page sits, how big it is and what granule position it carries.
//! Useful when a file seeks badly or reports a strange duration.

use std::io::Read;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::ogg::PageSync;
use crate::opus::{is_opus_head, OpusHeader};
use crate::types::samples_to_ms;

const READ_CHUNK: usize = 4096;

/// One page as found in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReport {
    /// 1-based page number
    pub ordinal: usize,
    pub offset: u64,
    pub total_size: usize,
    pub header_size: usize,
    pub body_size: usize,
    /// Packets finishing on this page
    pub packets: usize,
    pub serial: u32,
    pub granule_position: i64,
    /// Granule position as ms; `None` when the page carries no granule
    pub time_ms: Option<u32>,
    pub bos: bool,
    pub eos: bool,
    pub continued: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub pages: usize,
    pub packets: usize,
    pub last_granule: Option<i64>,
    pub pre_skip: Option<u16>,
    /// Playable length (last granule minus pre-skip)
    pub duration_ms: Option<u32>,
    /// Bytes skipped while hunting for pages (garbage or bad checksums)
    pub skipped_bytes: u64,
}

/// Scan every page of `reader`
pub fn scan_pages<R: Read>(mut reader: R) -> EngineResult<(Vec<PageReport>, StreamSummary)> {
    let mut sync = PageSync::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut reports = Vec::new();
    let mut summary = StreamSummary::default();

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::new(ErrorKind::FileReadError, e.to_string())),
        };
        sync.feed(&chunk[..n]);

        while let Some(page) = sync.next_page() {
            if page.is_bos() && is_opus_head(&page.body) {
                summary.pre_skip = OpusHeader::parse(&page.body).ok().map(|h| h.pre_skip);
            }
            if page.has_granule() {
                summary.last_granule = Some(page.granule_position);
            }

            let packets = page.packets_completed();
            summary.packets += packets;
            reports.push(PageReport {
                ordinal: reports.len() + 1,
                offset: page.offset,
                total_size: page.total_len(),
                header_size: page.header_len(),
                body_size: page.body_len(),
                packets,
                serial: page.serial,
                granule_position: page.granule_position,
                time_ms: page
                    .has_granule()
                    .then(|| samples_to_ms(page.granule_position)),
                bos: page.is_bos(),
                eos: page.is_eos(),
                continued: page.is_continued(),
            });
        }
    }

    summary.pages = reports.len();
    summary.skipped_bytes = sync.skipped_bytes();
    summary.duration_ms = summary
        .last_granule
        .map(|g| samples_to_ms(g - summary.pre_skip.unwrap_or(0) as i64));

    if reports.is_empty() {
        return Err(EngineError::new(ErrorKind::OggSyncError, "no Ogg page found in input"));
    }
    Ok((reports, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ogg_fixture, FixtureSpec};
    use std::io::Cursor;

    #[test]
    fn test_scan_reports_every_page() {
        let bytes = ogg_fixture(&FixtureSpec::default());
        let (pages, summary) = scan_pages(Cursor::new(&bytes)).unwrap();

        // Two header pages, then 251 packets at five per page
        assert_eq!(summary.pages, 2 + 51);
        assert_eq!(summary.packets, 2 + 251);
        assert_eq!(summary.pre_skip, Some(312));
        assert_eq!(summary.last_granule, Some(240_312));
        assert_eq!(summary.duration_ms, Some(5000));
        assert_eq!(summary.skipped_bytes, 0);

        assert!(pages[0].bos);
        assert_eq!(pages[0].offset, 0);
        assert_eq!(pages[1].offset, pages[0].total_size as u64);
        assert_eq!(pages[2].time_ms, Some(100));
        assert!(pages.last().unwrap().eos);

        let total: usize = pages.iter().map(|p| p.total_size).sum();
        assert_eq!(total, bytes.len());
    }

    #[test]
    fn test_pages_without_granule_have_no_time() {
        let bytes = ogg_fixture(&FixtureSpec {
            strip_granules: true,
            ..FixtureSpec::default()
        });
        let (pages, summary) = scan_pages(Cursor::new(bytes)).unwrap();
        assert!(pages.iter().all(|p| p.time_ms.is_none()));
        assert_eq!(summary.duration_ms, None);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut bytes = b"garbage!".to_vec();
        bytes.extend(ogg_fixture(&FixtureSpec::default()));
        let (pages, summary) = scan_pages(Cursor::new(bytes)).unwrap();
        assert_eq!(summary.skipped_bytes, 8);
        assert_eq!(pages[0].offset, 8);
    }

    #[test]
    fn test_no_pages_is_sync_error() {
        let err = scan_pages(Cursor::new(vec![0u8; 100])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OggSyncError);
    }
}

//! File-type sniffing from a payload's leading bytes, used to name blocks
//! handed to the persistence collaborator after a completed transfer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Jpeg,
    Png,
    Gif,
    Binary,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Jpeg => "jpg",
            FileType::Png => "png",
            FileType::Gif => "gif",
            FileType::Binary => "binary",
        }
    }
}

/// Inspect up to the first four bytes of `data` and classify its type.
pub fn sniff(data: &[u8]) -> FileType {
    if data.starts_with(&[0xFF, 0xD8]) {
        FileType::Jpeg
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        FileType::Png
    } else if data.starts_with(&[0x47, 0x49, 0x46]) {
        FileType::Gif
    } else {
        FileType::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jpeg() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), FileType::Jpeg);
    }

    #[test]
    fn detects_png() {
        assert_eq!(sniff(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]), FileType::Png);
    }

    #[test]
    fn detects_gif() {
        assert_eq!(sniff(b"GIF89a"), FileType::Gif);
    }

    #[test]
    fn falls_back_to_binary() {
        assert_eq!(sniff(&[0x00, 0x01, 0x02]), FileType::Binary);
        assert_eq!(sniff(&[]), FileType::Binary);
    }

    #[test]
    fn extension_names_match_type() {
        assert_eq!(FileType::Jpeg.extension(), "jpg");
        assert_eq!(FileType::Binary.extension(), "binary");
    }
}

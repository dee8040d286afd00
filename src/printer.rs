//! ESC/POS network receipt printer.
//!
//! The printer is reached over raw TCP (port 9100). Text is sent in the
//! WPC1251 code page, an optional logo is rasterised with `GS v 0`.

use anyhow::{Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::core::config::PrintSettings;

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Printable dots per line of a 58 mm head.
const MAX_LOGO_WIDTH: u32 = 384;

/// Encodes text as Windows-1251; unmapped characters become `?`.
pub fn encode_cp1251(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\0'..='\x7F' => c as u8,
            'А'..='я' => (c as u32 - 'А' as u32) as u8 + 0xC0,
            'Ё' => 0xA8,
            'ё' => 0xB8,
            'Є' => 0xAA,
            'є' => 0xBA,
            'І' => 0xB2,
            'і' => 0xB3,
            'Ї' => 0xAF,
            'ї' => 0xBF,
            'Ґ' => 0xA5,
            'ґ' => 0xB4,
            '№' => 0xB9,
            '«' => 0xAB,
            '»' => 0xBB,
            _ => b'?',
        })
        .collect()
}

/// Raw command stream for one receipt.
#[derive(Debug, Default)]
pub struct EscPosBuilder {
    buf: Vec<u8>,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'@']);
        self
    }

    pub fn codepage(&mut self, page: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b't', page]);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.buf.extend(encode_cp1251(text));
        self
    }

    pub fn feed(&mut self, lines: usize) -> &mut Self {
        self.buf.extend(std::iter::repeat(b'\n').take(lines));
        self
    }

    /// `GS v 0` raster bit image, one bit per dot, dark pixels printed.
    pub fn raster(&mut self, image: &GrayImage) -> &mut Self {
        let (width, height) = image.dimensions();
        let row_bytes = width.div_ceil(8);

        self.buf.extend_from_slice(&[GS, b'v', b'0', 0]);
        self.buf.extend_from_slice(&(row_bytes as u16).to_le_bytes());
        self.buf.extend_from_slice(&(height as u16).to_le_bytes());

        for y in 0..height {
            for byte in 0..row_bytes {
                let mut bits = 0u8;
                for bit in 0..8 {
                    let x = byte * 8 + bit;
                    if x < width && image.get_pixel(x, y).0[0] < 128 {
                        bits |= 0x80 >> bit;
                    }
                }
                self.buf.push(bits);
            }
        }
        self
    }

    /// Partial cut after feeding past the cutter.
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, b'V', 66, 0]);
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Loads the logo and scales it down to the head width.
fn load_logo(bytes: &[u8]) -> Result<GrayImage> {
    let mut logo = image::load_from_memory(bytes)?;
    if logo.width() > MAX_LOGO_WIDTH {
        logo = logo.resize(MAX_LOGO_WIDTH, u32::MAX, image::imageops::FilterType::Triangle);
    }
    Ok(logo.to_luma8())
}

#[derive(Debug, Clone)]
pub struct Printer {
    address: String,
    logo: Option<PathBuf>,
    bottom_margin: usize,
    codepage: u8,
}

impl Printer {
    /// `None` when no printer is configured.
    pub fn from_settings(settings: &PrintSettings) -> Option<Self> {
        let Some(printer) = settings.printer.as_ref() else {
            log::warn!("missing printer config; ignoring...");
            return None;
        };
        let printer = Self {
            address: format!("{}:{}", printer.host, printer.port),
            logo: settings.logo.clone(),
            bottom_margin: settings.bottom_margin,
            codepage: settings.codepage,
        };
        log::info!("Printer: {:?}", printer);
        Some(printer)
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(&self.address).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    log::warn!("printer retry attempt: {} ({})", attempt, e);
                    tokio::time::sleep(CONNECT_PAUSE).await;
                }
                Err(e) => return Err(e).with_context(|| format!("printer {}", self.address)),
            }
        }
    }

    async fn render(&self, text: &str) -> Vec<u8> {
        let mut builder = EscPosBuilder::new();
        builder.init();

        if let Some(path) = self.logo.as_deref() {
            match read_logo(path).await {
                Ok(logo) => {
                    builder.raster(&logo);
                }
                Err(e) => log::warn!("Logo {} skipped: {:#}", path.display(), e),
            }
        }

        builder
            .codepage(self.codepage)
            .text(text)
            .feed(self.bottom_margin)
            .cut()
            .build()
    }

    /// Connects (with retries) and prints in the background.
    ///
    /// Connection errors are returned; write errors after that are only logged.
    pub async fn print_receipt(&self, text: &str) -> Result<()> {
        let mut stream = self.connect().await?;
        let data = self.render(text).await;

        tokio::spawn(async move {
            if let Err(e) = stream.write_all(&data).await {
                log::error!("printer write error: {}", e);
                return;
            }
            if let Err(e) = stream.shutdown().await {
                log::warn!("printer close error: {}", e);
            }
        });
        Ok(())
    }
}

async fn read_logo(path: &Path) -> Result<GrayImage> {
    let bytes = fs_err::tokio::read(path).await?;
    load_logo(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PrinterSettings;
    use image::Luma;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_ukrainian() {
        assert_eq!(encode_cp1251("абвїґ"), vec![0xE0, 0xE1, 0xE2, 0xBF, 0xB4]);
        assert_eq!(encode_cp1251("Ціна: 5"), vec![0xD6, 0xB3, 0xED, 0xE0, b':', b' ', b'5']);
        assert_eq!(encode_cp1251("€"), vec![b'?']);
    }

    #[test]
    fn test_raster_header_and_bits() {
        let mut image = GrayImage::from_pixel(10, 2, Luma([255]));
        image.put_pixel(0, 0, Luma([0]));
        image.put_pixel(9, 1, Luma([0]));

        let bytes = EscPosBuilder::new().raster(&image).build();

        assert_eq!(&bytes[..8], &[GS, b'v', b'0', 0, 2, 0, 2, 0]);
        assert_eq!(&bytes[8..], &[0x80, 0x00, 0x00, 0x40]);
    }

    #[tokio::test]
    async fn test_print_receipt_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let settings = PrintSettings {
            printer: Some(PrinterSettings {
                host: "127.0.0.1".to_string(),
                port,
            }),
            bottom_margin: 2,
            ..PrintSettings::default()
        };
        let printer = Printer::from_settings(&settings).unwrap();

        printer.print_receipt("Чек").await.unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();

        let mut expected = vec![ESC, b'@', ESC, b't', 46, 0xD7, 0xE5, 0xEA, b'\n', b'\n'];
        expected.extend_from_slice(&[GS, b'V', 66, 0]);
        assert_eq!(received, expected);
    }

    #[test]
    fn test_unconfigured_printer() {
        assert!(Printer::from_settings(&PrintSettings::default()).is_none());
    }
}

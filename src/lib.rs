//! reMarkable MCP Server Library
//!
//! Exposes a reMarkable tablet's documents to MCP clients as readable
//! resources, with optional handwriting recognition.
//!
//! # Modules
//!
//! - `storage`: document store adapters (USB web interface, local xochitl directory)
//! - `library`: document registry, path resolution and background population
//! - `extract`: text extraction from document archives
//! - `ocr`: OCR backend selection and page recognition
//! - `mcp`: JSON-RPC protocol handling over stdio

pub mod config;
pub mod error;
pub mod extract;
pub mod library;
pub mod mcp;
pub mod ocr;
pub mod state;
pub mod storage;

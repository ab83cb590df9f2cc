#![forbid(unsafe_code)]

//! XML document services for the Vaxholm XML Encryption library.
//!
//! Provides parsing options, ID-attribute registration, element lookup
//! and byte-range serialization helpers over `roxmltree`.

pub mod document;

pub use document::{
    build_id_map, collect_text, content_range, find_child_element, find_element,
    first_element_child, is_element_named, next_element_sibling, parsing_options,
    qualified_name, serialize_node,
};

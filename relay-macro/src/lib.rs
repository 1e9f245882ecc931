//! Proc-macros for the Relay boot loader.
#![cfg_attr(doc, feature(doc_cfg))]
#![expect(
	clippy::single_call_fn,
	reason = "most macro entry points are single-call for code organization"
)]
#![allow(
	clippy::unwrap_used,
	clippy::unwrap_in_result,
	clippy::indexing_slicing,
	clippy::unreachable,
	reason = "panics during proc macro expansion are acceptable"
)]
#![allow(
	clippy::missing_docs_in_private_items,
	reason = "macros are typically self-documenting through public interface"
)]
#![allow(
	clippy::needless_pass_by_value,
	reason = "consistent ownership semantics for proc macro inputs"
)]

extern crate proc_macro;

mod compatible;

use proc_macro::TokenStream;

/// Builds a driver's compatible-string table.
///
/// Each entry is a device-tree compatible string, optionally followed
/// by `=> expr` giving the match data handed to the driver's initializer
/// when that entry is the one that matched. Entries without match data
/// get `MatchData::None`.
///
/// ```ignore
/// use relay_macro::compatible;
///
/// const TABLE: &[Compatible] = compatible![
/// 	"ns16550a",
/// 	"nvidia,tegra20-uart" => MatchData::Ns16550 { reg_shift: 2 },
/// ];
/// ```
///
/// The strings are checked at compile time: the table must not be empty,
/// and every string must be non-empty, printable ASCII without whitespace,
/// and unique within the table.
#[proc_macro]
pub fn compatible(input: TokenStream) -> TokenStream {
	match compatible::compatible(input.into()) {
		Ok(ts) => ts.into(),
		Err(err) => err.to_compile_error().into(),
	}
}

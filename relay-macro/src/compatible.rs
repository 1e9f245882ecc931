use proc_macro2::TokenStream;
use quote::quote;
use syn::{
	Expr, LitStr, Result, Token,
	parse::{Parse, ParseStream, Parser},
	punctuated::Punctuated,
};

struct Entry {
	string: LitStr,
	data:   Option<Expr>,
}

impl Parse for Entry {
	fn parse(input: ParseStream<'_>) -> Result<Self> {
		let string: LitStr = input.parse()?;
		let data = if input.peek(Token![=>]) {
			input.parse::<Token![=>]>()?;
			Some(input.parse()?)
		} else {
			None
		};

		Ok(Self { string, data })
	}
}

fn check_string(lit: &LitStr) -> Result<String> {
	let value = lit.value();

	if value.is_empty() {
		return Err(syn::Error::new_spanned(
			lit,
			"compatible strings must not be empty",
		));
	}

	if let Some(bad) = value.chars().find(|c| !c.is_ascii_graphic()) {
		return Err(syn::Error::new_spanned(
			lit,
			format!("compatible strings must be printable ASCII without whitespace (found {bad:?})"),
		));
	}

	Ok(value)
}

pub fn compatible(input: TokenStream) -> Result<TokenStream> {
	let entries = Punctuated::<Entry, Token![,]>::parse_terminated.parse2(input.clone())?;

	if entries.is_empty() {
		return Err(syn::Error::new_spanned(
			input,
			"a compatible table needs at least one entry",
		));
	}

	let mut seen: Vec<String> = Vec::with_capacity(entries.len());
	let mut items = Vec::with_capacity(entries.len());

	for entry in &entries {
		let value = check_string(&entry.string)?;

		if seen.contains(&value) {
			return Err(syn::Error::new_spanned(
				&entry.string,
				format!("duplicate compatible string {value:?}"),
			));
		}

		let string = &entry.string;
		let data = entry.data.as_ref().map_or_else(
			|| quote!(::relay_driver::MatchData::None),
			|expr| quote!(#expr),
		);

		items.push(quote! {
			::relay_driver::Compatible {
				string: #string,
				data: #data,
			}
		});

		seen.push(value);
	}

	Ok(quote! {
		&[#(#items),*]
	})
}

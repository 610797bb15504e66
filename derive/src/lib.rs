extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    parse_macro_input, parse_quote, Attribute, Data, DataEnum, DeriveInput, Fields, GenericArgument,
    Ident, Index, LitInt, LitStr, Member, Path, PathArguments, Type,
};

/// Field attributes parsed from `#[serial(...)]` annotations
///
/// * `skip` - The field is not transcoded and keeps its default on read
/// * `with` - A function `fn(&mut T, &mut Serializer<'_>) -> Result<()>` used instead of `Serializable`
/// * `count` - An earlier sibling field holding the element count; the length is not written
/// * `cstr` - A `String` written null-terminated
/// * `fixed` - A `String` of exactly this many characters
#[derive(Default)]
struct FieldAttributes {
    skip: bool,
    with: Option<Path>,
    count: Option<Member>,
    cstr: bool,
    fixed: Option<LitInt>,
}

impl FieldAttributes {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = FieldAttributes::default();
        for attr in attrs {
            if !attr.path().is_ident("serial") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    parsed.skip = true;
                } else if meta.path.is_ident("with") {
                    let lit: LitStr = meta.value()?.parse()?;
                    parsed.with = Some(lit.parse()?);
                } else if meta.path.is_ident("count") {
                    let lit: LitStr = meta.value()?.parse()?;
                    parsed.count = Some(parse_member(&lit)?);
                } else if meta.path.is_ident("cstr") {
                    parsed.cstr = true;
                } else if meta.path.is_ident("fixed") {
                    parsed.fixed = Some(meta.value()?.parse()?);
                } else {
                    return Err(meta.error("unknown serial attribute"));
                }
                Ok(())
            })?;
        }
        let forms = [
            parsed.with.is_some(),
            parsed.count.is_some(),
            parsed.cstr,
            parsed.fixed.is_some(),
        ];
        if forms.iter().filter(|set| **set).count() > 1 {
            return Err(syn::Error::new(
                Span::call_site(),
                "with, count, cstr and fixed are mutually exclusive",
            ));
        }
        Ok(parsed)
    }
}

/// `"name"` for named fields, `"0"` for tuple fields.
fn parse_member(lit: &LitStr) -> syn::Result<Member> {
    let value = lit.value();
    if let Ok(index) = value.parse::<u32>() {
        return Ok(Member::Unnamed(Index {
            index,
            span: lit.span(),
        }));
    }
    Ok(Member::Named(Ident::new(&value, lit.span())))
}

/// The container-level `#[serial(chunk = "ABCD")]`.
fn parse_chunk_id(attrs: &[Attribute]) -> syn::Result<Option<[u8; 4]>> {
    let mut chunk = None;
    for attr in attrs {
        if !attr.path().is_ident("serial") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("chunk") {
                let lit: LitStr = meta.value()?.parse()?;
                let bytes = lit.value().into_bytes();
                if bytes.len() != 4 || !bytes.is_ascii() {
                    return Err(syn::Error::new(
                        lit.span(),
                        "chunk id must be exactly 4 ASCII characters",
                    ));
                }
                chunk = Some([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Ok(())
            } else {
                Err(meta.error("unknown serial container attribute"))
            }
        })?;
    }
    Ok(chunk)
}

/// The count-elided serializer method for a collection field type.
fn count_method(ty: &Type) -> Option<TokenStream2> {
    let segment = match ty {
        Type::Array(_) => return Some(quote!(serialize_slice_items)),
        Type::Path(path) => path.path.segments.last()?,
        _ => return None,
    };
    let method = match segment.ident.to_string().as_str() {
        "Vec" => quote!(serialize_items),
        "Box" => {
            let PathArguments::AngleBracketed(args) = &segment.arguments else {
                return None;
            };
            match args.args.first()? {
                GenericArgument::Type(Type::Slice(_)) => quote!(serialize_boxed_items),
                _ => return None,
            }
        }
        "HashSet" | "BTreeSet" | "IndexSet" | "AHashSet" => quote!(serialize_set_items),
        "HashMap" | "BTreeMap" | "IndexMap" | "AHashMap" => quote!(serialize_map_items),
        _ => return None,
    };
    Some(method)
}

fn member_name(member: &Member) -> String {
    match member {
        Member::Named(ident) => ident.to_string(),
        Member::Unnamed(index) => index.index.to_string(),
    }
}

/// Transcoding statements for every field, in declaration order, and the
/// types of the fields that go through `Serializable`.
fn serialize_fields(fields: &Fields) -> syn::Result<(Vec<TokenStream2>, Vec<Type>)> {
    let mut statements = Vec::new();
    let mut bounded = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let member = match &field.ident {
            Some(ident) => Member::Named(ident.clone()),
            None => Member::Unnamed(Index::from(i)),
        };
        let attrs = FieldAttributes::parse(&field.attrs)?;
        seen.push(member_name(&member));
        if attrs.skip {
            continue;
        }

        let statement = if let Some(with) = &attrs.with {
            quote! { #with(&mut self.#member, serializer)?; }
        } else if let Some(count) = &attrs.count {
            let count_name = member_name(count);
            if !seen[..seen.len() - 1].contains(&count_name) {
                return Err(syn::Error::new_spanned(
                    &field.ty,
                    format!(
                        "count field `{}` must be declared before `{}`",
                        count_name,
                        member_name(&member)
                    ),
                ));
            }
            let method = count_method(&field.ty).ok_or_else(|| {
                syn::Error::new_spanned(
                    &field.ty,
                    "count requires a Vec, Box<[T]>, array, set or map field",
                )
            })?;
            quote! {
                {
                    let count = usize::try_from(self.#count).map_err(|_| {
                        ::chunk_serializer::FormatError::InvalidData(format!(
                            "count field `{}` holds an invalid length",
                            #count_name
                        ))
                    })?;
                    serializer.#method(&mut self.#member, count)?;
                }
            }
        } else if attrs.cstr {
            quote! { serializer.serialize_cstr(&mut self.#member)?; }
        } else if let Some(fixed) = &attrs.fixed {
            quote! { serializer.serialize_fixed_str(&mut self.#member, #fixed)?; }
        } else {
            bounded.push(field.ty.clone());
            quote! { ::chunk_serializer::Serializable::serialize(&mut self.#member, serializer)?; }
        };
        statements.push(statement);
    }
    Ok((statements, bounded))
}

/// The wire integer for a fieldless enum: the `#[repr(..)]` integer, with
/// `usize`/`isize` widened to 64 bits, or `i32` when absent.
fn enum_repr(attrs: &[Attribute]) -> syn::Result<Ident> {
    let mut repr = Ident::new("i32", Span::call_site());
    for attr in attrs {
        if !attr.path().is_ident("repr") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let Some(ident) = meta.path.get_ident() else {
                return Err(meta.error("unsupported repr for Serializable"));
            };
            let name = ident.to_string();
            let wire = match name.as_str() {
                "C" => return Ok(()),
                "usize" => "u64",
                "isize" => "i64",
                "u8" | "i8" | "u16" | "i16" | "u32" | "i32" | "u64" | "i64" | "u128" | "i128" => {
                    name.as_str()
                }
                _ => {
                    return Err(meta.error(format!(
                        "repr({}) is not supported by Serializable; use an integer repr",
                        ident
                    )))
                }
            };
            repr = Ident::new(wire, ident.span());
            Ok(())
        })?;
    }
    Ok(repr)
}

fn serialize_enum(
    name: &Ident,
    data: &DataEnum,
    attrs: &[Attribute],
    generic: bool,
) -> syn::Result<TokenStream2> {
    let repr = enum_repr(attrs)?;
    let mut to_raw = Vec::new();
    let mut from_raw = Vec::new();
    let mut fits = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "Serializable can only be derived for enums without fields",
            ));
        }
        let ident = &variant.ident;
        to_raw.push(quote! { Self::#ident => Self::#ident as #repr });
        from_raw.push(quote! { raw if raw == Self::#ident as #repr => Self::#ident });
        if !generic {
            fits.push(quote! {
                const _: () = assert!(
                    #name::#ident as i128 == (#name::#ident as #repr) as i128,
                    concat!(
                        "discriminant of ",
                        stringify!(#name::#ident),
                        " does not fit in ",
                        stringify!(#repr)
                    )
                );
            });
        }
    }
    let name_str = name.to_string();
    Ok(quote! {
        #(#fits)*
        let mut raw: #repr = match self {
            #(#to_raw,)*
        };
        ::chunk_serializer::Serializable::serialize(&mut raw, serializer)?;
        *self = match raw {
            #(#from_raw,)*
            other => {
                return Err(::chunk_serializer::FormatError::InvalidData(format!(
                    "{} is not a valid {}",
                    other, #name_str
                ))
                .into())
            }
        };
    })
}

/// Derive macro for the `Serializable` trait
///
/// Structs transcode their fields in declaration order; fieldless enums
/// transcode their discriminant with the width of their `#[repr(..)]`.
///
/// # Attributes
///
/// * `#[serial(chunk = "ABCD")]` on a struct - frames the fields in a chunk
/// * `#[serial(skip)]`, `#[serial(with = "path")]`, `#[serial(count = "field")]`,
///   `#[serial(cstr)]`, `#[serial(fixed = N)]` on fields
#[proc_macro_derive(Serializable, attributes(serial))]
pub fn derive_serializable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand(mut input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = input.ident.clone();
    let chunk = parse_chunk_id(&input.attrs)?;

    let mut field_types = Vec::new();
    let body = match &input.data {
        Data::Struct(s) => {
            let (statements, bounded) = serialize_fields(&s.fields)?;
            field_types = bounded;
            match chunk {
                Some([a, b, c, d]) => quote! {
                    serializer.begin_chunk(::chunk_serializer::FourCC::new([#a, #b, #c, #d]))?;
                    #(#statements)*
                    serializer.end_chunk()?;
                },
                None => quote! { #(#statements)* },
            }
        }
        Data::Enum(e) => {
            if chunk.is_some() {
                return Err(syn::Error::new_spanned(
                    &name,
                    "chunk framing is only supported on structs",
                ));
            }
            let generic = input.generics.type_params().next().is_some();
            serialize_enum(&name, e, &input.attrs, generic)?
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                &name,
                "Serializable cannot be derived for unions",
            ))
        }
    };

    let params: Vec<Ident> = input.generics.type_params().map(|p| p.ident.clone()).collect();
    if !params.is_empty() {
        let where_clause = input.generics.make_where_clause();
        for param in params {
            where_clause
                .predicates
                .push(parse_quote!(#param: ::chunk_serializer::Serializable));
        }
        // containers such as Vec<T> need more than T: Serializable
        for ty in field_types {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::chunk_serializer::Serializable));
        }
    }
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::chunk_serializer::Serializable for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn serialize(
                &mut self,
                serializer: &mut ::chunk_serializer::Serializer<'_>,
            ) -> ::chunk_serializer::Result<()> {
                #body
                Ok(())
            }
        }
    })
}

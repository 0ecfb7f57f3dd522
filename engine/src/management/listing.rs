use alloc::string::String;
use core::fmt::{self, Write};

use crate::catalog::Catalog;
use crate::storage::Entry;

const HEAD: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>clipbox</title></head><body>\n<h1>clipbox</h1>\n";

const UPLOAD_FORM: &str = "<h2>Upload</h2>\n\
<form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\
<input type=\"file\" name=\"file\" required> <input type=\"submit\" value=\"Upload\"></form>\n";

const TAIL: &str = "</body></html>\n";

/// Storage listing page with delete links, the upload form and the missing catalog entries.
pub fn render_listing(entries: &[Entry], catalog: &Catalog) -> String {
    let mut page = String::with_capacity(HEAD.len() + UPLOAD_FORM.len() + 64 * entries.len());
    // Writing into a String cannot fail.
    let _ = write_listing(&mut page, entries, catalog);
    page
}

fn write_listing(out: &mut String, entries: &[Entry], catalog: &Catalog) -> fmt::Result {
    out.push_str(HEAD);

    out.push_str("<h2>Files</h2>\n");
    if entries.is_empty() {
        out.push_str("<p>No files on the card.</p>\n");
    } else {
        out.push_str("<table>\n<tr><th>Name</th><th>Clip</th><th>Size</th><th></th></tr>\n");
        for entry in entries {
            out.push_str("<tr><td>");
            escape_into(out, &entry.name);
            out.push_str("</td><td>");
            if let Some(id) = catalog.id_of(&entry.name) {
                write!(out, "{}", id)?;
            }
            write!(out, "</td><td>{}</td><td><a href=\"/delete?filename=", entry.size)?;
            percent_encode_into(out, &entry.name)?;
            out.push_str("\">delete</a></td></tr>\n");
        }
        out.push_str("</table>\n");
    }

    let mut missing = catalog
        .ids()
        .filter(|id| {
            !entries
                .iter()
                .any(|entry| catalog.id_of(&entry.name) == Some(*id))
        })
        .map(|id| catalog.name_of(id))
        .peekable();
    if missing.peek().is_some() {
        out.push_str("<h2>Missing clips</h2>\n<ul>\n");
        for name in missing {
            out.push_str("<li>");
            escape_into(out, &name);
            out.push_str("</li>\n");
        }
        out.push_str("</ul>\n");
    }

    out.push_str(UPLOAD_FORM);
    out.push_str(TAIL);
    Ok(())
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

fn percent_encode_into(out: &mut String, text: &str) -> fmt::Result {
    for b in text.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'~') {
            out.push(b as char);
        } else {
            write!(out, "%{:02X}", b)?;
        }
    }
    Ok(())
}

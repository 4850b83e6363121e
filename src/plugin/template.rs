//! Tiny placeholder substitution for engine action templates (§9 design
//! notes: "a small formatter, not a full template engine"). Action strings
//! carry literal placeholders like `{code}`, `{code_b64}`, `{header[0]}` or
//! `{lens.clen}`; none of the placeholder names are substrings of one
//! another, so plain sequential `str::replace` calls are sufficient and
//! keep every engine payload's real template syntax (Nunjucks/Jinja-style
//! double braces, Twig's `{{ }}`, etc.) untouched.

/// Everything a capability template might reference when it is rendered.
/// Fields are filled in lazily by the caller; absent values simply leave
/// their placeholder unexpanded (which never happens in practice since
/// plugin authors only reference what they populate).
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub code: Option<&'a str>,
    pub code_b64: Option<String>,
    pub code_b64p: Option<String>,
    pub path: Option<&'a str>,
    pub chunk_b64: Option<String>,
    pub chunk_b64p: Option<String>,
    pub delay: Option<u64>,
    pub closure: Option<&'a str>,
    pub header_rand: Option<[u32; 2]>,
    pub trailer_rand: Option<[u32; 2]>,
    pub lens_clen: Option<usize>,
    pub lens_clen64: Option<usize>,
    pub lens_clen64p: Option<usize>,
    pub port: Option<u16>,
    pub host: Option<&'a str>,
    pub shell: Option<&'a str>,
}

impl<'a> TemplateVars<'a> {
    pub fn render(&self, template: &str) -> String {
        let mut out = template.to_string();
        if let Some(v) = self.code {
            out = out.replace("{code}", v);
        }
        if let Some(v) = &self.code_b64 {
            out = out.replace("{code_b64}", v);
        }
        if let Some(v) = &self.code_b64p {
            out = out.replace("{code_b64p}", v);
        }
        if let Some(v) = self.path {
            out = out.replace("{path}", v);
        }
        if let Some(v) = &self.chunk_b64 {
            out = out.replace("{chunk_b64}", v);
        }
        if let Some(v) = &self.chunk_b64p {
            out = out.replace("{chunk_b64p}", v);
        }
        if let Some(v) = self.delay {
            out = out.replace("{delay}", &v.to_string());
        }
        if let Some(v) = self.closure {
            out = out.replace("{closure}", v);
        }
        if let Some([a, b]) = self.header_rand {
            out = out.replace("{header[0]}", &a.to_string());
            out = out.replace("{header[1]}", &b.to_string());
        }
        if let Some([a, b]) = self.trailer_rand {
            out = out.replace("{trailer[0]}", &a.to_string());
            out = out.replace("{trailer[1]}", &b.to_string());
        }
        if let Some(v) = self.lens_clen {
            out = out.replace("{lens.clen}", &v.to_string());
        }
        if let Some(v) = self.lens_clen64 {
            out = out.replace("{lens.clen64}", &v.to_string());
        }
        if let Some(v) = self.lens_clen64p {
            out = out.replace("{lens.clen64p}", &v.to_string());
        }
        if let Some(v) = self.port {
            out = out.replace("{port}", &v.to_string());
        }
        if let Some(v) = self.host {
            out = out.replace("{host}", v);
        }
        if let Some(v) = self.shell {
            out = out.replace("{shell}", v);
        }
        out
    }
}

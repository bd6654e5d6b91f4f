//! Code generation
//!
//! Turns a captured exchange into a snippet that repeats the request
//! (curl, fetch, axios) or into a test that asserts on its outcome.

use crate::capture::{ExchangeRecord, HeaderFields};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write;
use std::str::FromStr;

/// Output format of [`generate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CodeTarget {
    Curl,
    FetchJs,
    FetchTs,
    AxiosJs,
    AxiosTs,
    JestTest,
    VitestTest,
}

impl CodeTarget {
    pub const ALL: [CodeTarget; 7] = [
        CodeTarget::Curl,
        CodeTarget::FetchJs,
        CodeTarget::FetchTs,
        CodeTarget::AxiosJs,
        CodeTarget::AxiosTs,
        CodeTarget::JestTest,
        CodeTarget::VitestTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeTarget::Curl => "curl",
            CodeTarget::FetchJs => "fetch-js",
            CodeTarget::FetchTs => "fetch-ts",
            CodeTarget::AxiosJs => "axios-js",
            CodeTarget::AxiosTs => "axios-ts",
            CodeTarget::JestTest => "jest-test",
            CodeTarget::VitestTest => "vitest-test",
        }
    }

    /// The target after this one, wrapping around
    pub fn next(&self) -> CodeTarget {
        let index = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for CodeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown code target `{0}`")]
pub struct UnknownCodeTarget(String);

impl FromStr for CodeTarget {
    type Err = UnknownCodeTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CodeTarget::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCodeTarget(s.to_string()))
    }
}

/// Generate source text for `record` in the given format
pub fn generate(record: &ExchangeRecord, target: CodeTarget) -> String {
    match target {
        CodeTarget::Curl => curl(record),
        CodeTarget::FetchJs => fetch(record, false),
        CodeTarget::FetchTs => fetch(record, true),
        CodeTarget::AxiosJs => axios(record, false),
        CodeTarget::AxiosTs => axios(record, true),
        CodeTarget::JestTest => test_suite(record, TestFramework::Jest),
        CodeTarget::VitestTest => test_suite(record, TestFramework::Vitest),
    }
}

fn parse_json(body: &str) -> Option<serde_json::Value> {
    serde_json::from_str(body).ok()
}

fn request_body(record: &ExchangeRecord) -> Option<&str> {
    record.request.body.as_deref().filter(|b| !b.is_empty())
}

fn shell_quote(text: &str) -> String {
    text.replace('\'', "'\\''")
}

fn js_string(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
}

fn curl(record: &ExchangeRecord) -> String {
    let request = &record.request;
    let mut out = format!("curl -X {} '{}'", request.method, shell_quote(&request.url));

    for (key, value) in &request.headers {
        let _ = write!(out, " \\\n  -H '{}'", shell_quote(&format!("{}: {}", key, value)));
    }

    if let Some(body) = request_body(record) {
        let text = parse_json(body)
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| body.to_string());
        let _ = write!(out, " \\\n  -d '{}'", shell_quote(&text));
    }

    out
}

/// `  headers: {...}` block at the given indent, or nothing for no headers
fn headers_block(headers: &HeaderFields, indent: &str) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = headers
        .iter()
        .map(|(k, v)| format!("{}  '{}': '{}'", indent, js_string(k), js_string(v)))
        .collect();
    format!(",\n{}headers: {{\n{}\n{}}}", indent, entries.join(",\n"), indent)
}

/// `body`/`data` property: JSON is inlined, anything else becomes a string literal
fn body_property(body: &str, key: &str, wrap_json: bool) -> String {
    match parse_json(body) {
        Some(_) if wrap_json => format!("{}: JSON.stringify({})", key, body),
        Some(_) => format!("{}: {}", key, body),
        None => format!("{}: '{}'", key, js_string(body)),
    }
}

const RESPONSE_INTERFACE: &str = "interface ResponseData {\n  // describe the response shape here\n}\n\n";

fn fetch(record: &ExchangeRecord, typed: bool) -> String {
    let request = &record.request;
    let mut out = String::new();

    if typed {
        out.push_str(RESPONSE_INTERFACE);
    }
    let _ = write!(out, "fetch('{}', {{\n  method: '{}'", js_string(&request.url), request.method);
    out.push_str(&headers_block(&request.headers, "  "));
    if let Some(body) = request_body(record) {
        let _ = write!(out, ",\n  {}", body_property(body, "body", true));
    }

    if typed {
        out.push_str(
            "\n})\n  .then((response: Response) => response.json())\n  .then((data: ResponseData) => console.log(data))\n  .catch((error: Error) => console.error(error));",
        );
    } else {
        out.push_str(
            "\n})\n  .then(response => response.json())\n  .then(data => console.log(data))\n  .catch(error => console.error(error));",
        );
    }
    out
}

fn axios(record: &ExchangeRecord, typed: bool) -> String {
    let request = &record.request;
    let mut out = String::new();

    if typed {
        out.push_str("import type { AxiosResponse, AxiosError } from 'axios';\n\n");
        out.push_str(RESPONSE_INTERFACE);
        out.push_str("axios<ResponseData>({\n");
    } else {
        out.push_str("axios({\n");
    }
    let _ = write!(
        out,
        "  method: '{}',\n  url: '{}'",
        request.method,
        js_string(&request.url)
    );
    out.push_str(&headers_block(&request.headers, "  "));
    if let Some(body) = request_body(record) {
        let _ = write!(out, ",\n  {}", body_property(body, "data", false));
    }

    if typed {
        out.push_str(
            "\n})\n  .then((response: AxiosResponse<ResponseData>) => console.log(response.data))\n  .catch((error: AxiosError) => console.error(error));",
        );
    } else {
        out.push_str(
            "\n})\n  .then(response => console.log(response.data))\n  .catch(error => console.error(error));",
        );
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestFramework {
    Jest,
    Vitest,
}

fn test_suite(record: &ExchangeRecord, framework: TestFramework) -> String {
    let request = &record.request;
    let method = &request.method;
    let url = js_string(&request.url);
    let body = request_body(record);
    let mut out = String::new();

    if framework == TestFramework::Vitest {
        out.push_str("import { describe, it, expect } from 'vitest';\n");
    }
    out.push_str("import axios from 'axios';\n\n");
    let _ = writeln!(out, "describe('API Test - {} {}', () => {{", method, url);
    out.push_str("  it('should return successful response', async () => {\n");
    out.push_str("    const response = await axios({\n");
    let _ = write!(out, "      method: '{}',\n      url: '{}'", method, url);
    if let Some(body) = body {
        let _ = write!(out, ",\n      {}", body_property(body, "data", false));
    }
    out.push_str("\n    });\n\n");

    match &record.response {
        Some(response) => {
            let _ = writeln!(out, "    expect(response.status).toBe({});", response.status);
            if !response.body.is_empty() {
                match parse_json(&response.body) {
                    Some(value) if value.is_object() || value.is_array() => {
                        out.push_str("    expect(response.data).toMatchObject({\n");
                        out.push_str("      // fill in the expected response fields\n");
                        out.push_str("    });\n");
                    }
                    Some(_) => {}
                    None => out.push_str("    expect(response.data).toBeDefined();\n"),
                }
            }
        }
        None => {
            out.push_str("    expect(response.status).toBe(200);\n");
            out.push_str("    expect(response.data).toBeDefined();\n");
        }
    }
    out.push_str("  });\n");

    out.push_str("\n  it('should handle errors properly', async () => {\n");
    out.push_str("    try {\n");
    out.push_str("      await axios({\n");
    let _ = write!(out, "        method: '{}',\n        url: '{}/invalid'", method, url);
    if let Some(body) = body {
        let _ = write!(out, ",\n        {}", body_property(body, "data", false));
    }
    out.push_str("\n      });\n");
    out.push_str("    } catch (error) {\n");
    out.push_str("      expect(error).toBeDefined();\n");
    out.push_str("    }\n");
    out.push_str("  });\n");
    out.push_str("});\n");

    out
}

// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 - 2026 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{self as ah, format_err as err, Context as _};
use std::{collections::HashMap, path::Path};

/// Simple `.ini` style file parser.
///
/// Sections with the same name are merged.
/// Later options override earlier ones.
pub struct Ini {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Ini {
    pub fn new() -> Self {
        Self {
            sections: HashMap::new(),
        }
    }

    pub fn read_file(&mut self, path: &Path) -> ah::Result<()> {
        let content = std::fs::read_to_string(path).context("Read configuration file")?;
        self.parse_str(&content)
    }

    pub fn parse_str(&mut self, content: &str) -> ah::Result<()> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut in_section = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(line) = line.strip_prefix('[') {
                let Some(sname) = line.strip_suffix(']') else {
                    return Err(err!("Section header is not closed: '[{line}'"));
                };
                let sname = sname.trim();
                if sname.is_empty() {
                    return Err(err!("Section name is empty."));
                }
                sections.entry(sname.to_string()).or_default();
                in_section = Some(sname.to_string());
                continue;
            }
            let Some(section) = &in_section else {
                return Err(err!("Option is not inside of a section: '{line}'"));
            };
            let Some((opt_name, opt_value)) = line.split_once('=') else {
                return Err(err!("Option has no equal sign '=': '{line}'"));
            };
            sections
                .get_mut(section)
                .unwrap()
                .insert(opt_name.trim().to_string(), opt_value.trim().to_string());
        }

        self.sections = sections;
        Ok(())
    }

    /// Get the value of an option from the given section.
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(option))
            .map(|v| v.as_str())
    }
}

impl Default for Ini {
    fn default() -> Self {
        Self::new()
    }
}


// vim: ts=4 sw=4 expandtab

//! Contact directory: spreadsheet rows grouped by branch, rendered as links
//! into the call page.
use crate::view::Locale;
use anyhow::{anyhow, Result};
use calamine::{open_workbook_auto, Data, Reader};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

const NAME_HEADERS: &[&str] = &["name"];
const PHONE_HEADERS: &[&str] = &["phone number", "phone"];
const BRANCH_HEADERS: &[&str] = &["branch name", "branch"];

/// One spreadsheet row as `(header, value)` pairs in column order.
pub type ContactRow = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub name: String,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Directory {
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactLink {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchLinks {
    pub name: String,
    pub contacts: Vec<ContactLink>,
}

/// First non-empty value among the header spellings. For each spelling an
/// exact header wins over a case-insensitive one, then column order decides.
fn lookup<'a>(row: &'a ContactRow, aliases: &[&str]) -> Option<&'a str> {
    let find = |alias: &str, exact: bool| {
        row.iter()
            .find(|(header, value)| {
                let header = header.trim();
                let matched = if exact {
                    header == alias
                } else {
                    header.eq_ignore_ascii_case(alias)
                };
                matched && !value.trim().is_empty()
            })
            .map(|(_, value)| value.trim())
    };
    aliases
        .iter()
        .find_map(|alias| find(alias, true).or_else(|| find(alias, false)))
}

impl Contact {
    pub fn from_row(row: &ContactRow, locale: Locale) -> Option<Self> {
        let name = lookup(row, NAME_HEADERS)?;
        Some(Self {
            name: name.to_string(),
            phone: lookup(row, PHONE_HEADERS).unwrap_or_default().to_string(),
            branch: lookup(row, BRANCH_HEADERS)
                .unwrap_or(locale.unclassified())
                .to_string(),
        })
    }

    /// `<origin>/phone#name=<enc>&phone=<enc>`
    pub fn call_link(&self, origin: &Url) -> Result<Url> {
        let mut link = origin.join("/phone")?;
        link.set_fragment(Some(&format!(
            "name={}&phone={}",
            urlencoding::encode(&self.name),
            urlencoding::encode(&self.phone)
        )));
        Ok(link)
    }
}

impl Directory {
    /// Groups contacts by branch, branches in first-seen order, contacts in row order.
    pub fn from_rows(rows: &[ContactRow], locale: Locale) -> Self {
        let mut branches: Vec<Branch> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (n, row) in rows.iter().enumerate() {
            let contact = match Contact::from_row(row, locale) {
                Some(contact) => contact,
                None => {
                    debug!(row = n, "skipping row without a name");
                    continue;
                }
            };
            let slot = *index.entry(contact.branch.clone()).or_insert_with(|| {
                branches.push(Branch {
                    name: contact.branch.clone(),
                    contacts: Vec::new(),
                });
                branches.len() - 1
            });
            branches[slot].contacts.push(contact);
        }
        Self { branches }
    }

    pub fn len(&self) -> usize {
        self.branches.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Branches with each contact's call page link, ready for the contact list page.
    pub fn links(&self, origin: &Url) -> Result<Vec<BranchLinks>> {
        self.branches
            .iter()
            .map(|branch| {
                let contacts = branch
                    .contacts
                    .iter()
                    .map(|contact| {
                        Ok(ContactLink {
                            name: contact.name.clone(),
                            href: contact.call_link(origin)?.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(BranchLinks {
                    name: branch.name.clone(),
                    contacts,
                })
            })
            .collect()
    }
}

/// Message shown in place of the list when the spreadsheet cannot be read.
pub fn load_error_message(path: &Path, locale: Locale) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    locale.contact_list_failed(&file_name)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Reads the first sheet; the first row holds the headers.
pub fn load_rows(path: &Path) -> Result<Vec<ContactRow>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| anyhow!("directory: {}: {}", path.display(), e))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("directory: {}: workbook has no sheets", path.display()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| anyhow!("directory: {}: {}", path.display(), e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };
    let contacts: Vec<ContactRow> = rows
        .map(|row| {
            headers
                .iter()
                .zip(row.iter())
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, cell)| (header.clone(), cell_to_string(cell)))
                .collect()
        })
        .collect();
    info!(
        path = %path.display(),
        sheet = sheet_name,
        rows = contacts.len(),
        "contact list loaded"
    );
    Ok(contacts)
}

pub fn load_directory(path: &Path, locale: Locale) -> Result<Directory> {
    Ok(Directory::from_rows(&load_rows(path)?, locale))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> ContactRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_group_by_branch_with_header_spellings() {
        let rows = vec![
            row(&[("name", "A"), ("phone", "1"), ("branch", "X")]),
            row(&[("name", "B"), ("phone", "2"), ("Branch Name", "X")]),
        ];
        let directory = Directory::from_rows(&rows, Locale::Ja);
        assert_eq!(directory.branches.len(), 1);
        let branch = &directory.branches[0];
        assert_eq!(branch.name, "X");
        let names: Vec<_> = branch.contacts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(branch.contacts[1].phone, "2");
    }

    #[test]
    fn test_branch_order_is_first_seen() {
        let rows = vec![
            row(&[("Name", "A"), ("Phone Number", "1"), ("Branch Name", "Tokyo")]),
            row(&[("Name", "B"), ("Phone Number", "2"), ("Branch Name", "Osaka")]),
            row(&[("Name", "C"), ("Phone Number", "3"), ("Branch Name", "Tokyo")]),
            row(&[("Name", "D"), ("Phone Number", "4")]),
        ];
        let directory = Directory::from_rows(&rows, Locale::Ja);
        let branches: Vec<_> = directory.branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(branches, vec!["Tokyo", "Osaka", "未分類"]);
        assert_eq!(directory.branches[0].contacts.len(), 2);
        assert_eq!(directory.len(), 4);
    }

    #[test]
    fn test_phone_number_header_preferred_and_nameless_rows_skipped() {
        let rows = vec![
            row(&[("NAME", "A"), ("phone number", "0311112222"), ("phone", "ignored")]),
            row(&[("name", ""), ("phone number", "0333334444")]),
        ];
        let directory = Directory::from_rows(&rows, Locale::En);
        assert_eq!(directory.len(), 1);
        let contact = &directory.branches[0].contacts[0];
        assert_eq!(contact.phone, "0311112222");
        assert_eq!(contact.branch, "Unclassified");
    }

    #[test]
    fn test_call_link_encodes_fragment() -> Result<()> {
        let contact = Contact {
            name: "佐藤 太郎".to_string(),
            phone: "+81 90&1".to_string(),
            branch: "X".to_string(),
        };
        let origin = Url::parse("http://127.0.0.1:8080/contactlist")?;
        let link = contact.call_link(&origin)?;
        assert_eq!(link.path(), "/phone");
        assert_eq!(
            link.fragment(),
            Some("name=%E4%BD%90%E8%97%A4%20%E5%A4%AA%E9%83%8E&phone=%2B81%2090%261")
        );
        Ok(())
    }

    #[test]
    fn test_exact_header_spelling_wins() {
        let rows = vec![row(&[
            ("Name", "Display"),
            ("name", "Exact"),
            ("phone", "1"),
        ])];
        let directory = Directory::from_rows(&rows, Locale::Ja);
        assert_eq!(directory.branches[0].contacts[0].name, "Exact");

        // without an exact match the first column in order is used
        let rows = vec![row(&[("NAME", "Upper"), ("Name", "Title")])];
        let directory = Directory::from_rows(&rows, Locale::Ja);
        assert_eq!(directory.branches[0].contacts[0].name, "Upper");
    }

    #[test]
    fn test_links_point_at_call_page() -> Result<()> {
        let rows = vec![row(&[("name", "<A>"), ("phone", "1"), ("branch", "X&Y")])];
        let directory = Directory::from_rows(&rows, Locale::Ja);
        let branches = directory.links(&Url::parse("http://localhost:8080")?)?;
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "X&Y");
        assert_eq!(branches[0].contacts[0].name, "<A>");
        assert_eq!(
            branches[0].contacts[0].href,
            "http://localhost:8080/phone#name=%3CA%3E&phone=1"
        );
        Ok(())
    }

    #[test]
    fn test_load_missing_spreadsheet() {
        let path = Path::new("/nonexistent/contact_list.xlsx");
        assert!(load_rows(path).is_err());
        assert_eq!(
            load_error_message(path, Locale::Ja),
            "contact_list.xlsx の読み込みに失敗しました。"
        );
    }

    fn fixture() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/contact_list.xlsx")
    }

    #[test]
    fn test_load_fixture_reads_first_sheet_only() -> Result<()> {
        let rows = load_rows(&fixture())?;
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            row(&[
                ("Name", "佐藤 太郎"),
                ("Phone Number", "312345678"),
                ("Branch Name", "東京"),
            ])
        );

        let directory = load_directory(&fixture(), Locale::Ja)?;
        let branches: Vec<_> = directory.branches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(branches, vec!["東京", "NY"]);
        assert_eq!(directory.len(), 3);
        let tokyo = &directory.branches[0];
        assert_eq!(tokyo.contacts[0].phone, "312345678");
        assert_eq!(tokyo.contacts[1].name, "鈴木");
        assert_eq!(tokyo.contacts[1].phone, "9012345678");
        assert_eq!(directory.branches[1].contacts[0].phone, "+14155550100");
        assert!(directory
            .branches
            .iter()
            .flat_map(|b| &b.contacts)
            .all(|c| c.name != "Hidden"));
        Ok(())
    }

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(9012345678.0)), "9012345678");
        assert_eq!(cell_to_string(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_to_string(&Data::Int(42)), "42");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}

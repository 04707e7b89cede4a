//! SQL dialect differences between the supported backends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::ForeignKey;

/// Backend kind, selected by `DJ_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
}

impl Dialect {
    /// Quote an identifier, escaping embedded quote characters.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgresql => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Qualified `schema.table` reference.
    pub fn qualified(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(table))
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Mysql => "?".to_string(),
            Dialect::Postgresql => format!("${}", index),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::Mysql => 3306,
            Dialect::Postgresql => 5432,
        }
    }

    pub fn default_user(&self) -> &'static str {
        match self {
            Dialect::Mysql => "root",
            Dialect::Postgresql => "postgres",
        }
    }

    pub fn create_schema(&self, schema: &str) -> String {
        match self {
            Dialect::Mysql => format!("CREATE DATABASE {}", self.quote_identifier(schema)),
            Dialect::Postgresql => format!("CREATE SCHEMA {}", self.quote_identifier(schema)),
        }
    }

    pub fn drop_schema(&self, schema: &str) -> String {
        match self {
            Dialect::Mysql => format!("DROP DATABASE IF EXISTS {}", self.quote_identifier(schema)),
            Dialect::Postgresql => {
                format!("DROP SCHEMA IF EXISTS {} CASCADE", self.quote_identifier(schema))
            }
        }
    }

    /// Copy a table's structure (columns, keys, indexes) into another schema.
    pub fn create_table_like(&self, source: &str, dest: &str, table: &str) -> String {
        match self {
            Dialect::Mysql => format!(
                "CREATE TABLE {} LIKE {}",
                self.qualified(dest, table),
                self.qualified(source, table)
            ),
            Dialect::Postgresql => format!(
                "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
                self.qualified(dest, table),
                self.qualified(source, table)
            ),
        }
    }

    /// Recreate a foreign key on `schema.table`. Same-schema references
    /// resolve against `schema`.
    pub fn add_foreign_key(&self, schema: &str, table: &str, fk: &ForeignKey) -> String {
        let cols: Vec<String> = fk.columns.iter().map(|c| self.quote_identifier(c)).collect();
        let refs: Vec<String> = fk
            .referenced_columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            self.qualified(schema, table),
            self.quote_identifier(&fk.name),
            cols.join(", "),
            self.qualified(fk.target_schema(schema), &fk.referenced_table),
            refs.join(", "),
            referential_action(&fk.on_update),
            referential_action(&fk.on_delete)
        )
    }

    /// Statements that rename a schema.
    ///
    /// MySQL has no `RENAME DATABASE`: the target is created, every table is
    /// moved with a single `RENAME TABLE`, then the emptied source is dropped.
    pub fn rename_schema(&self, from: &str, to: &str, tables: &[String]) -> Vec<String> {
        match self {
            Dialect::Postgresql => vec![format!(
                "ALTER SCHEMA {} RENAME TO {}",
                self.quote_identifier(from),
                self.quote_identifier(to)
            )],
            Dialect::Mysql => {
                let mut stmts = vec![self.create_schema(to)];
                if !tables.is_empty() {
                    let pairs: Vec<String> = tables
                        .iter()
                        .map(|t| format!("{} TO {}", self.qualified(from, t), self.qualified(to, t)))
                        .collect();
                    stmts.push(format!("RENAME TABLE {}", pairs.join(", ")));
                }
                stmts.push(format!("DROP DATABASE {}", self.quote_identifier(from)));
                stmts
            }
        }
    }
}

/// Normalize a catalog update/delete rule; anything unrecognized is `NO ACTION`.
fn referential_action(rule: &str) -> &'static str {
    match rule.trim().to_ascii_uppercase().as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" => "SET NULL",
        "SET DEFAULT" => "SET DEFAULT",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Mysql => write!(f, "mysql"),
            Dialect::Postgresql => write!(f, "postgresql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            other => Err(format!("unsupported backend: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Mysql.qualified("demo", "A"), "`demo`.`A`");
        assert_eq!(Dialect::Postgresql.qualified("demo", "A"), "\"demo\".\"A\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Mysql.placeholder(3), "?");
        assert_eq!(Dialect::Postgresql.placeholder(3), "$3");
    }

    #[test]
    fn test_mysql_rename_moves_tables() {
        let stmts = Dialect::Mysql.rename_schema("p", "p_old", &["a".into(), "b".into()]);
        assert_eq!(
            stmts,
            vec![
                "CREATE DATABASE `p_old`".to_string(),
                "RENAME TABLE `p`.`a` TO `p_old`.`a`, `p`.`b` TO `p_old`.`b`".to_string(),
                "DROP DATABASE `p`".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_foreign_key_targets_owner_schema() {
        let fk = ForeignKey::new("fk_subject", &["subject_id"], "subject", &["subject_id"]);
        assert_eq!(
            Dialect::Mysql.add_foreign_key("lab_v2", "session", &fk),
            "ALTER TABLE `lab_v2`.`session` ADD CONSTRAINT `fk_subject` FOREIGN KEY (`subject_id`) \
             REFERENCES `lab_v2`.`subject` (`subject_id`) ON UPDATE CASCADE ON DELETE RESTRICT"
        );

        let shared = ForeignKey {
            referenced_schema: Some("common".into()),
            on_delete: "bogus".into(),
            ..fk
        };
        let sql = Dialect::Postgresql.add_foreign_key("lab_v2", "session", &shared);
        assert!(sql.contains("REFERENCES \"common\".\"subject\" (\"subject_id\")"));
        assert!(sql.ends_with("ON DELETE NO ACTION"));
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}

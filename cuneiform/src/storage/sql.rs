// SQLite dialect emission. Literal values always travel as numbered
// parameters; only identifiers (validated at registration) reach the text.

use super::{Query, TableSchema};
use crate::expr::{Expr, Join, JoinDirection, Operand};
use crate::value::Value;

/// A SQL statement with its positional parameters (`?1`, `?2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote(table), quote(column))
}

pub fn create_table(table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote(&c.name), c.sql_type);
            if c.primary_key {
                def.push_str(" PRIMARY KEY AUTOINCREMENT");
            }
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(target) = &c.references {
                def.push_str(&format!(" REFERENCES {}(\"id\")", quote(target)));
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote(&table.name),
        columns.join(", ")
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote(table))
}

pub fn insert(table: &str, values: &[(String, Value)]) -> Statement {
    if values.is_empty() {
        return Statement {
            sql: format!("INSERT INTO {} DEFAULT VALUES", quote(table)),
            params: Vec::new(),
        };
    }
    let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: values.iter().map(|(_, v)| v.clone()).collect(),
    }
}

pub fn select(query: &Query) -> Statement {
    let mut params = Vec::new();
    let columns: Vec<String> = query
        .columns
        .iter()
        .map(|c| qualified(&query.table, c))
        .collect();
    let sql = select_sql(query, &columns.join(", "), &mut params);
    Statement { sql, params }
}

pub fn count(query: &Query) -> Statement {
    let mut params = Vec::new();
    let sql = if query.needs_subquery() {
        let inner = select_sql(query, &qualified(&query.table, "id"), &mut params);
        format!("SELECT COUNT(*) FROM ({inner})")
    } else {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            quote(&query.table),
            where_clause(query, &mut params)
        )
    };
    Statement { sql, params }
}

pub fn update(query: &Query, assignments: &[(String, Value)]) -> Statement {
    let mut params = Vec::new();
    let sets: Vec<String> = assignments
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?{}", quote(column), params.len())
        })
        .collect();
    let sql = format!(
        "UPDATE {} SET {}{}",
        quote(&query.table),
        sets.join(", "),
        target_rows(query, &mut params)
    );
    Statement { sql, params }
}

pub fn delete(query: &Query) -> Statement {
    let mut params = Vec::new();
    let sql = format!(
        "DELETE FROM {}{}",
        quote(&query.table),
        target_rows(query, &mut params)
    );
    Statement { sql, params }
}

/// Row selection for UPDATE and DELETE: a plain WHERE when possible,
/// otherwise the identities the equivalent SELECT would return.
fn target_rows(query: &Query, params: &mut Vec<Value>) -> String {
    if query.needs_subquery() {
        let inner = select_sql(query, &qualified(&query.table, "id"), params);
        format!(" WHERE {} IN ({inner})", quote("id"))
    } else {
        where_clause(query, params)
    }
}

fn select_sql(query: &Query, columns: &str, params: &mut Vec<Value>) -> String {
    let distinct = if query.has_joins() { "DISTINCT " } else { "" };
    let mut sql = format!(
        "SELECT {distinct}{columns} FROM {}",
        quote(&query.table)
    );
    if let Some(filter) = &query.filter {
        for join in filter.joins() {
            sql.push_str(&join_clause(join));
        }
    }
    sql.push_str(&where_clause(query, params));
    if !query.order_by.is_empty() {
        let terms: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    qualified(&o.column.source, &o.column.name),
                    o.direction.keyword()
                )
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

fn join_clause(join: &Join) -> String {
    let on = match join.direction {
        JoinDirection::Forward => format!(
            "{} = {}",
            qualified(&join.alias, "id"),
            qualified(&join.from, &join.via)
        ),
        JoinDirection::Reverse => format!(
            "{} = {}",
            qualified(&join.alias, &join.via),
            qualified(&join.from, "id")
        ),
    };
    format!(
        " LEFT JOIN {} AS {} ON {on}",
        quote(&join.table),
        quote(&join.alias)
    )
}

fn where_clause(query: &Query, params: &mut Vec<Value>) -> String {
    match &query.filter {
        Some(filter) => format!(" WHERE {}", expr(filter, params)),
        None => String::new(),
    }
}

fn expr(node: &Expr, params: &mut Vec<Value>) -> String {
    match node {
        Expr::Compare {
            column,
            op,
            operand,
        } => {
            let rhs = match operand {
                Operand::Value(v) => {
                    params.push(v.clone());
                    format!("?{}", params.len())
                }
                Operand::Column(c) => qualified(&c.source, &c.name),
            };
            format!(
                "{} {} {rhs}",
                qualified(&column.source, &column.name),
                op.symbol()
            )
        }
        Expr::IsNull { column, negated } => {
            let not = if *negated { " NOT" } else { "" };
            format!("{} IS{not} NULL", qualified(&column.source, &column.name))
        }
        Expr::And { left, right } => {
            format!("({} AND {})", expr(left, params), expr(right, params))
        }
        Expr::Or { left, right } => {
            format!("({} OR {})", expr(left, params), expr(right, params))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::FieldRef;
    use crate::registry::Registry;
    use crate::schema::{FieldDefinition, ModelDefinition};
    use crate::storage::ColumnSchema;
    use pretty_assertions::assert_eq;
    use sqlparser::dialect::SQLiteDialect;
    use sqlparser::parser::Parser;
    use std::sync::Arc;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_model(
                &ModelDefinition::new("Address")
                    .field(FieldDefinition::text("street"))
                    .field(FieldDefinition::text("town")),
            )
            .unwrap();
        registry
            .register_model(
                &ModelDefinition::new("Company")
                    .field(FieldDefinition::text("name").required())
                    .field(FieldDefinition::integer("employees"))
                    .field(FieldDefinition::reference("addr", "Address")),
            )
            .unwrap();
        registry
    }

    fn company_query(registry: &Registry) -> Query {
        let company = registry.model("Company").unwrap();
        Query::new(company.table(), company.columns())
    }

    fn assert_parses(sql: &str) {
        Parser::parse_sql(&SQLiteDialect {}, sql)
            .unwrap_or_else(|e| panic!("emitted SQL does not parse: {sql}\n{e}"));
    }

    #[test]
    fn test_select_with_filter_order_limit() {
        let registry = registry();
        let company = registry.model("Company").unwrap();
        let name = FieldRef::new(company.field("name").unwrap());
        let employees = FieldRef::new(company.field("employees").unwrap());

        let mut query = company_query(&registry);
        query.filter = Some(Arc::new(
            name.eq("solute").unwrap().or(employees.gt(10).unwrap()),
        ));
        query.order_by = vec![name.asc()];
        query.limit = Some(3);

        let stmt = select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT \"company\".\"id\", \"company\".\"name\", \"company\".\"employees\", \"company\".\"addr_id\" \
             FROM \"company\" WHERE (\"company\".\"name\" = ?1 OR \"company\".\"employees\" > ?2) \
             ORDER BY \"company\".\"name\" ASC LIMIT 3"
        );
        assert_eq!(stmt.params, vec![Value::from("solute"), Value::from(10)]);
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_select_with_forward_join_is_distinct() {
        let registry = registry();
        let company = registry.model("Company").unwrap();
        let address = registry.model("Address").unwrap();
        let town = FieldRef::follow(company.field("addr").unwrap(), address.field("town").unwrap()).unwrap();

        let mut query = company_query(&registry);
        query.filter = Some(Arc::new(town.eq("Karlsruhe").unwrap()));
        let stmt = select(&query);
        assert!(stmt.sql.starts_with("SELECT DISTINCT "));
        assert!(stmt.sql.contains(
            " LEFT JOIN \"address\" AS \"company__addr\" ON \"company__addr\".\"id\" = \"company\".\"addr_id\""
        ));
        assert!(stmt.sql.ends_with(" WHERE \"company__addr\".\"town\" = ?1"));
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_reverse_join() {
        let registry = registry();
        let address = registry.model("Address").unwrap();
        let company = registry.model("Company").unwrap();
        let relation = registry.relation("Address", "companies").unwrap();
        let name = FieldRef::reverse(&address, relation, company.field("name").unwrap()).unwrap();

        let mut query = Query::new(address.table(), address.columns());
        query.filter = Some(Arc::new(name.eq("solute").unwrap()));
        let stmt = select(&query);
        assert!(stmt.sql.contains(
            " LEFT JOIN \"company\" AS \"address__companies\" ON \"address__companies\".\"addr_id\" = \"address\".\"id\""
        ));
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_count_plain_and_limited() {
        let registry = registry();
        let mut query = company_query(&registry);
        assert_eq!(count(&query).sql, "SELECT COUNT(*) FROM \"company\"");

        query.limit = Some(0);
        let stmt = count(&query);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT \"company\".\"id\" FROM \"company\" LIMIT 0)"
        );
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_update_numbers_parameters_in_order() {
        let registry = registry();
        let company = registry.model("Company").unwrap();
        let name = FieldRef::new(company.field("name").unwrap());
        let mut query = company_query(&registry);
        query.filter = Some(Arc::new(name.eq("old").unwrap()));

        let stmt = update(
            &query,
            &[
                ("name".to_string(), Value::from("new")),
                ("employees".to_string(), Value::from(3)),
            ],
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"company\" SET \"name\" = ?1, \"employees\" = ?2 WHERE \"company\".\"name\" = ?3"
        );
        assert_eq!(stmt.params.len(), 3);
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_delete_with_join_uses_identity_subquery() {
        let registry = registry();
        let company = registry.model("Company").unwrap();
        let address = registry.model("Address").unwrap();
        let town = FieldRef::follow(company.field("addr").unwrap(), address.field("town").unwrap()).unwrap();

        let mut query = company_query(&registry);
        query.filter = Some(Arc::new(town.eq("Stuttgart").unwrap()));
        let stmt = delete(&query);
        assert!(stmt.sql.starts_with(
            "DELETE FROM \"company\" WHERE \"id\" IN (SELECT DISTINCT \"company\".\"id\" FROM \"company\" LEFT JOIN"
        ));
        assert_parses(&stmt.sql);
    }

    #[test]
    fn test_insert() {
        let stmt = insert(
            "town",
            &[("name".to_string(), Value::from("Karlsruhe"))],
        );
        assert_eq!(stmt.sql, "INSERT INTO \"town\" (\"name\") VALUES (?1)");
        assert_parses(&stmt.sql);
        assert_eq!(insert("town", &[]).sql, "INSERT INTO \"town\" DEFAULT VALUES");
    }

    #[test]
    fn test_create_table() {
        let table = TableSchema {
            name: "company".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    primary_key: true,
                    references: None,
                },
                ColumnSchema {
                    name: "name".into(),
                    sql_type: "VARCHAR(255)".into(),
                    not_null: true,
                    primary_key: false,
                    references: None,
                },
                ColumnSchema {
                    name: "addr_id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    primary_key: false,
                    references: Some("address".into()),
                },
            ],
        };
        assert_eq!(
            create_table(&table),
            "CREATE TABLE \"company\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" VARCHAR(255) NOT NULL, \"addr_id\" INTEGER REFERENCES \"address\"(\"id\"))"
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}

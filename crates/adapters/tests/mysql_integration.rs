use sqlnav_adapters::mysql::MysqlAdapter;
use sqlnav_core::adapter::{Adapter, Connection};
use sqlnav_core::row_iterator::RowIterator;
use sqlnav_core::schema_loader::load_schema;

const DATABASE: &str = "sqlnav_adapters_cov";

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("SQLNAV_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_dsn(database: Option<&str>) -> String {
    let base = std::env::var("SQLNAV_TEST_MYSQL_DSN")
        .unwrap_or_else(|_| "mysql://root@127.0.0.1:3306".to_string());
    match database {
        Some(database) => format!("{}/{database}", base.trim_end_matches('/')),
        None => base,
    }
}

async fn execute_sql(connection: &dyn Connection, sql: &str) {
    connection.execute(sql).await.expect("statement should run");
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_connection_schema_and_query_paths() {
    if !mysql_integration_enabled() {
        return;
    }

    let adapter = MysqlAdapter;
    let admin = adapter
        .connect(&integration_dsn(None))
        .await
        .expect("admin connect should succeed");
    execute_sql(
        admin.as_ref(),
        &format!("CREATE DATABASE IF NOT EXISTS `{DATABASE}`"),
    )
    .await;
    admin.close().await.expect("admin close should succeed");

    let connection = adapter
        .connect(&integration_dsn(Some(DATABASE)))
        .await
        .expect("connect should succeed");
    connection.ping().await.expect("ping should succeed");
    assert_eq!(connection.database_name(), DATABASE);

    execute_sql(connection.as_ref(), "DROP TABLE IF EXISTS integration_users").await;
    execute_sql(
        connection.as_ref(),
        "CREATE TABLE integration_users (\
         id BIGINT NOT NULL PRIMARY KEY,\
         email VARCHAR(64) NOT NULL,\
         age INT NULL\
         )",
    )
    .await;
    let inserted = connection
        .execute(
            "INSERT INTO integration_users (id, email, age) VALUES \
             (1, 'a@example.com', 22), (2, 'b@example.com', NULL), (3, 'c@example.com', 40)",
        )
        .await
        .expect("insert should succeed");
    assert_eq!(inserted.row_count, 3);
    assert!(inserted.columns.is_empty());

    let schema = load_schema(connection.as_ref())
        .await
        .expect("schema load should succeed");
    let table = schema
        .databases
        .iter()
        .find(|database| database.name == DATABASE)
        .and_then(|database| database.schema(DATABASE))
        .and_then(|schema| schema.table("integration_users"))
        .expect("table should be listed");
    let column_names: Vec<&str> = table.columns.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(column_names, vec!["id", "email", "age"]);
    assert!(table.indexes.iter().any(|index| index.primary));

    let buffered = connection
        .execute("SELECT id, email, age FROM integration_users ORDER BY id")
        .await
        .expect("buffered query should succeed");
    assert_eq!(buffered.row_count, 3);
    assert_eq!(buffered.rows[1].values[2], "NULL");

    let mut iterator = connection
        .execute_streaming("SELECT id FROM integration_users ORDER BY id;", 2)
        .await
        .expect("stream should open");
    let first = iterator.fetch_next().await.expect("first page");
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].values[0], "1");
    let second = iterator.fetch_next().await.expect("second page");
    assert_eq!(second.len(), 1);
    assert!(iterator
        .fetch_next()
        .await
        .expect_err("no third page")
        .is_end_of_data());
    let back = iterator.fetch_prev().await.expect("previous page");
    assert_eq!(back[0].values[0], "1");
    iterator.close().await.expect("iterator close should succeed");

    connection.cancel().await.expect("idle cancel should succeed");
    let completions = connection.completions().await.expect("completions");
    assert!(completions.iter().any(|item| item == "integration_users"));

    execute_sql(connection.as_ref(), "DROP TABLE integration_users").await;
    connection.close().await.expect("close should succeed");
    connection.close().await.expect("second close should be a no-op");
}

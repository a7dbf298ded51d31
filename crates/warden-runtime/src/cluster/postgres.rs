use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use warden_core::cluster::{ClusterRecord, GuildId, LockedNodes, NodeCommand, NodeRecord};

use super::store::{CoordinationStore, CoordinationTx, InstanceStore, StoreResult};

/// Coordination store backed by the shared Postgres database.
#[derive(Clone)]
pub struct PgCoordinationStore {
    pool: PgPool,
}

impl PgCoordinationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cluster_from_row(guild: GuildId, row: (String, String, bool)) -> ClusterRecord {
    let (master, version, update_pending) = row;
    ClusterRecord {
        guild,
        master,
        version,
        update_pending,
    }
}

#[async_trait]
impl CoordinationStore for PgCoordinationStore {
    async fn begin(&self, guild: GuildId) -> StoreResult<Box<dyn CoordinationTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCoordinationTx { guild, tx }))
    }

    async fn upsert_node_liveness(&self, guild: GuildId, node: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (guild_id, node, last_seen)
            VALUES ($1, $2, NOW())
            ON CONFLICT (guild_id, node) DO UPDATE SET last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(guild.as_i64())
        .bind(node)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_node(&self, guild: GuildId, node: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM nodes WHERE guild_id = $1 AND node = $2")
            .bind(guild.as_i64())
            .bind(node)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_cluster(&self, guild: GuildId) -> StoreResult<Option<ClusterRecord>> {
        let row: Option<(String, String, bool)> = sqlx::query_as(
            "SELECT master, version, update_pending FROM cluster WHERE guild_id = $1",
        )
        .bind(guild.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| cluster_from_row(guild, row)))
    }

    async fn set_update_pending(&self, guild: GuildId, pending: bool) -> StoreResult<()> {
        sqlx::query("UPDATE cluster SET update_pending = $2 WHERE guild_id = $1")
            .bind(guild.as_i64())
            .bind(pending)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue_command(
        &self,
        guild: GuildId,
        node: &str,
        command: &NodeCommand,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO intercom (guild_id, node, data) VALUES ($1, $2, $3)")
            .bind(guild.as_i64())
            .bind(node)
            .bind(command.to_json())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take_commands(
        &self,
        guild: GuildId,
        node: &str,
    ) -> StoreResult<Vec<serde_json::Value>> {
        let mut rows: Vec<(i32, serde_json::Value)> = sqlx::query_as(
            r#"
            DELETE FROM intercom
            WHERE id IN (
                SELECT id FROM intercom
                WHERE guild_id = $1 AND node = $2
                ORDER BY id
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, data
            "#,
        )
        .bind(guild.as_i64())
        .bind(node)
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|(id, _)| *id);
        Ok(rows.into_iter().map(|(_, data)| data).collect())
    }
}

#[async_trait]
impl InstanceStore for PgCoordinationStore {
    async fn upsert_instance(
        &self,
        node: &str,
        instance: &str,
        port: u16,
        server_name: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (node, instance, port, server_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (node, instance) DO UPDATE
            SET port = EXCLUDED.port, server_name = EXCLUDED.server_name, last_seen = NOW()
            "#,
        )
        .bind(node)
        .bind(instance)
        .bind(i64::from(port))
        .bind(server_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_instance(&self, node: &str, instance: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM instances WHERE node = $1 AND instance = $2")
            .bind(node)
            .bind(instance)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rename_instance(
        &self,
        node: &str,
        old_name: &str,
        new_name: &str,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE instances SET instance = $3 WHERE node = $1 AND instance = $2")
            .bind(node)
            .bind(old_name)
            .bind(new_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_server(
        &self,
        node: &str,
        instance: &str,
        server_name: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE instances SET server_name = $3 WHERE node = $1 AND instance = $2")
            .bind(node)
            .bind(instance)
            .bind(server_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

struct PgCoordinationTx {
    guild: GuildId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CoordinationTx for PgCoordinationTx {
    async fn lock_nodes(&mut self) -> StoreResult<LockedNodes> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT node, last_seen FROM nodes WHERE guild_id = $1 ORDER BY node FOR UPDATE",
        )
        .bind(self.guild.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;

        // NOW() is frozen at transaction start, which may precede the lock wait.
        let (now,): (DateTime<Utc>,) = sqlx::query_as("SELECT clock_timestamp()")
            .fetch_one(&mut *self.tx)
            .await?;

        let guild = self.guild;
        Ok(LockedNodes {
            now,
            nodes: rows
                .into_iter()
                .map(|(name, last_seen)| NodeRecord {
                    guild,
                    name,
                    last_seen,
                })
                .collect(),
        })
    }

    async fn read_cluster(&mut self) -> StoreResult<Option<ClusterRecord>> {
        let row: Option<(String, String, bool)> = sqlx::query_as(
            "SELECT master, version, update_pending FROM cluster WHERE guild_id = $1",
        )
        .bind(self.guild.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|row| cluster_from_row(self.guild, row)))
    }

    async fn create_cluster(&mut self, master: &str, version: &str) -> StoreResult<bool> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO cluster (guild_id, master, version)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id) DO NOTHING
            RETURNING guild_id
            "#,
        )
        .bind(self.guild.as_i64())
        .bind(master)
        .bind(version)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(inserted.is_some())
    }

    async fn set_master(&mut self, master: &str) -> StoreResult<()> {
        sqlx::query("UPDATE cluster SET master = $2 WHERE guild_id = $1")
            .bind(self.guild.as_i64())
            .bind(master)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_version(&mut self, version: &str) -> StoreResult<()> {
        sqlx::query("UPDATE cluster SET version = $2 WHERE guild_id = $1")
            .bind(self.guild.as_i64())
            .bind(version)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_update_pending(&mut self, pending: bool) -> StoreResult<()> {
        sqlx::query("UPDATE cluster SET update_pending = $2 WHERE guild_id = $1")
            .bind(self.guild.as_i64())
            .bind(pending)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn enqueue_command(&mut self, node: &str, command: &NodeCommand) -> StoreResult<()> {
        sqlx::query("INSERT INTO intercom (guild_id, node, data) VALUES ($1, $2, $3)")
            .bind(self.guild.as_i64())
            .bind(node)
            .bind(command.to_json())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn touch_node(&mut self, node: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (guild_id, node, last_seen)
            VALUES ($1, $2, NOW())
            ON CONFLICT (guild_id, node) DO UPDATE SET last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(self.guild.as_i64())
        .bind(node)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

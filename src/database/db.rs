use chrono::{DateTime, Utc};
use itertools::Itertools;
use postgres_types::ToSql;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::database::db_structs::{
    Beatmap, CalculationValue, DifficultyCalculation, Invite, Leaderboard, Membership, MembershipScore,
    PerformanceCalculation, Score, ScoreStatistics
};
use crate::database::{MembershipUpdate, Store, StoreError};
use crate::model::structures::{
    beatmap_status::BeatmapStatus, gamemode::Gamemode, leaderboard_access::LeaderboardAccess, mods::Mods,
    score_mutation::ScoreMutation, score_set::ScoreSet
};

fn gamemode_from_row(row: &Row, field: &'static str) -> Result<Gamemode, StoreError> {
    let value = row.get::<_, i32>(field);
    Gamemode::try_from(value).map_err(|_| StoreError::InvalidDiscriminant { field, value })
}

#[derive(Clone)]
pub struct DbClient {
    client: Arc<Client>
}

impl DbClient {
    // Connect to the database and return a DbClient instance
    pub async fn connect(connection_str: &str) -> Result<Self, tokio_postgres::Error> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        Ok(DbClient {
            client: Arc::new(client)
        })
    }

    fn beatmap_from_row(row: &Row) -> Result<Beatmap, StoreError> {
        let status = row.get::<_, i32>("status");
        Ok(Beatmap {
            id: row.get("id"),
            gamemode: gamemode_from_row(row, "gamemode")?,
            status: BeatmapStatus::try_from(status).map_err(|_| StoreError::InvalidDiscriminant {
                field: "status",
                value: status
            })?,
            artist: row.get("artist"),
            title: row.get("title"),
            version: row.get("version"),
            creator_name: row.get("creator_name"),
            max_combo: row.get("max_combo"),
            star_rating: row.get("star_rating"),
            approach_rate: row.get("approach_rate"),
            overall_difficulty: row.get("overall_difficulty"),
            circle_size: row.get("circle_size"),
            health_drain: row.get("health_drain"),
            bpm: row.get("bpm"),
            length: row.get("length"),
            last_updated: row.get("last_updated")
        })
    }

    fn score_from_row(row: &Row) -> Result<Score, StoreError> {
        let mutation = row.get::<_, i32>("mutation");
        Ok(Score {
            id: row.get("id"),
            user_id: row.get("user_id"),
            beatmap_id: row.get("beatmap_id"),
            gamemode: gamemode_from_row(row, "gamemode")?,
            mods: Mods(row.get::<_, i64>("mods") as u32),
            statistics: ScoreStatistics {
                count_300: row.get("count_300"),
                count_100: row.get("count_100"),
                count_50: row.get("count_50"),
                count_miss: row.get("count_miss"),
                count_katu: row.get("count_katu"),
                count_geki: row.get("count_geki")
            },
            combo: row.get("combo"),
            accuracy: row.get("accuracy"),
            mutation: ScoreMutation::try_from(mutation).map_err(|_| StoreError::InvalidDiscriminant {
                field: "mutation",
                value: mutation
            })?,
            source_score_id: row.get("source_score_id"),
            created_at: row.get("created_at")
        })
    }

    fn leaderboard_from_row(row: &Row) -> Result<Leaderboard, StoreError> {
        let access_type = row.get::<_, i32>("access_type");
        let score_set = row.get::<_, i32>("score_set");
        Ok(Leaderboard {
            id: row.get("id"),
            gamemode: gamemode_from_row(row, "gamemode")?,
            name: row.get("name"),
            description: row.get("description"),
            owner_id: row.get("owner_id"),
            access_type: LeaderboardAccess::try_from(access_type).map_err(|_| StoreError::InvalidDiscriminant {
                field: "access_type",
                value: access_type
            })?,
            score_set: ScoreSet::try_from(score_set).map_err(|_| StoreError::InvalidDiscriminant {
                field: "score_set",
                value: score_set
            })?,
            decay_factor: row.get("decay_factor"),
            allow_past_scores: row.get("allow_past_scores"),
            archived: row.get("archived"),
            score_filter: serde_json::from_value(row.get::<_, serde_json::Value>("score_filter"))?,
            notification_target: row.get("notification_target")
        })
    }

    fn membership_from_row(row: &Row) -> Membership {
        Membership {
            id: row.get("id"),
            leaderboard_id: row.get("leaderboard_id"),
            user_id: row.get("user_id"),
            pp: row.get("pp"),
            score_count: row.get("score_count"),
            rank: row.get("rank"),
            joined_at: row.get("joined_at")
        }
    }

    fn membership_score_from_row(row: &Row) -> MembershipScore {
        MembershipScore {
            leaderboard_id: row.get("leaderboard_id"),
            membership_id: row.get("membership_id"),
            score_id: row.get("score_id"),
            raw_pp: row.get("raw_pp"),
            weighted_pp: row.get("weighted_pp")
        }
    }

    /// Attaches value rows to their parent calculations.
    async fn load_values(&self, table: &str, calculation_ids: &[i64]) -> Result<HashMap<i64, Vec<CalculationValue>>, StoreError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT calculation_id, name, value FROM {} WHERE calculation_id = ANY($1)",
                    table
                ),
                &[&calculation_ids]
            )
            .await?;

        let mut values: HashMap<i64, Vec<CalculationValue>> = HashMap::new();
        for row in rows {
            values
                .entry(row.get::<_, i64>("calculation_id"))
                .or_default()
                .push(CalculationValue {
                    name: row.get("name"),
                    value: row.get("value")
                });
        }

        Ok(values)
    }

    /// Replaces a calculation's value set: update matching names, insert new
    /// ones, delete the rest. Re-running with identical values is a no-op.
    async fn replace_values(
        &self,
        table: &str,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> Result<(), StoreError> {
        let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
        self.client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE calculation_id = $1 AND name != ALL($2)",
                    table
                ),
                &[&calculation_id, &names]
            )
            .await?;

        for value in values {
            let updated = self
                .client
                .execute(
                    &format!("UPDATE {} SET value = $1 WHERE calculation_id = $2 AND name = $3", table),
                    &[&value.value, &calculation_id, &value.name]
                )
                .await?;

            if updated == 0 {
                self.client
                    .execute(
                        &format!("INSERT INTO {} (calculation_id, name, value) VALUES ($1, $2, $3)", table),
                        &[&calculation_id, &value.name, &value.value]
                    )
                    .await?;
            }
        }

        Ok(())
    }
}

impl Store for DbClient {
    async fn get_beatmaps(&self, ids: &[i64]) -> Result<HashMap<i64, Beatmap>, StoreError> {
        let rows = self
            .client
            .query("SELECT * FROM beatmaps WHERE id = ANY($1)", &[&ids])
            .await?;

        let mut beatmaps = HashMap::with_capacity(rows.len());
        for row in &rows {
            let beatmap = Self::beatmap_from_row(row)?;
            beatmaps.insert(beatmap.id, beatmap);
        }

        Ok(beatmaps)
    }

    async fn get_user_scores(&self, user_id: i64, gamemode: Gamemode) -> Result<Vec<Score>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM scores WHERE user_id = $1 AND gamemode = $2 AND mutation = 0 ORDER BY id",
                &[&user_id, &(gamemode as i32)]
            )
            .await?;

        rows.iter().map(Self::score_from_row).collect()
    }

    async fn get_score_mutations(
        &self,
        source_score_ids: &[i64],
        mutation: ScoreMutation
    ) -> Result<Vec<Score>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM scores WHERE source_score_id = ANY($1) AND mutation = $2",
                &[&source_score_ids, &(mutation as i32)]
            )
            .await?;

        rows.iter().map(Self::score_from_row).collect()
    }

    async fn insert_score(&self, score: Score) -> Result<Score, StoreError> {
        let values: &[&(dyn ToSql + Sync)] = &[
            &score.user_id,
            &score.beatmap_id,
            &(score.gamemode as i32),
            &i64::from(score.mods.bits()),
            &score.statistics.count_300,
            &score.statistics.count_100,
            &score.statistics.count_50,
            &score.statistics.count_miss,
            &score.statistics.count_katu,
            &score.statistics.count_geki,
            &score.combo,
            &score.accuracy,
            &(score.mutation as i32),
            &score.source_score_id,
            &score.created_at
        ];

        let row = self
            .client
            .query_one(
                "INSERT INTO scores (user_id, beatmap_id, gamemode, mods, count_300, count_100, count_50, \
                 count_miss, count_katu, count_geki, combo, accuracy, mutation, source_score_id, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) RETURNING id",
                values
            )
            .await?;

        let mut inserted = score;
        inserted.id = row.get("id");
        Ok(inserted)
    }

    async fn get_scores_for_beatmaps(&self, beatmap_ids: &[i64]) -> Result<Vec<Score>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM scores WHERE beatmap_id = ANY($1) ORDER BY id",
                &[&beatmap_ids]
            )
            .await?;

        rows.iter().map(Self::score_from_row).collect()
    }

    async fn get_user_ids(&self, gamemode: Gamemode) -> Result<Vec<i64>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT user_id FROM scores WHERE gamemode = $1 AND mutation = 0 ORDER BY user_id",
                &[&(gamemode as i32)]
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn get_difficulty_calculations(
        &self,
        keys: &[(i64, Mods)],
        engine: &str
    ) -> Result<Vec<DifficultyCalculation>, StoreError> {
        let beatmap_ids = keys.iter().map(|(id, _)| *id).unique().collect_vec();
        let rows = self
            .client
            .query(
                "SELECT * FROM difficulty_calculations WHERE beatmap_id = ANY($1) AND engine = $2",
                &[&beatmap_ids, &engine]
            )
            .await?;

        let mut calculations = Vec::new();
        for row in &rows {
            let mods = Mods(row.get::<_, i64>("mods") as u32);
            let beatmap_id = row.get::<_, i64>("beatmap_id");
            if !keys.contains(&(beatmap_id, mods)) {
                continue;
            }

            calculations.push(DifficultyCalculation {
                id: row.get("id"),
                beatmap_id,
                mods,
                engine: row.get("engine"),
                calculator_version: row.get("calculator_version"),
                values: Vec::new()
            });
        }

        let ids = calculations.iter().map(|c| c.id).collect_vec();
        let mut values = self.load_values("difficulty_values", &ids).await?;
        for calculation in &mut calculations {
            calculation.values = values.remove(&calculation.id).unwrap_or_default();
        }

        Ok(calculations)
    }

    async fn upsert_difficulty_calculation(
        &self,
        beatmap_id: i64,
        mods: Mods,
        engine: &str,
        calculator_version: &str
    ) -> Result<Option<DifficultyCalculation>, StoreError> {
        let existing = self
            .client
            .query_opt(
                "SELECT id, calculator_version FROM difficulty_calculations \
                 WHERE beatmap_id = $1 AND mods = $2 AND engine = $3",
                &[&beatmap_id, &i64::from(mods.bits()), &engine]
            )
            .await?;

        let id = match existing {
            Some(row) => {
                let id = row.get::<_, i64>("id");
                let stored_version = row.get::<_, String>("calculator_version");
                if stored_version.as_str() > calculator_version {
                    return Ok(None);
                }
                if stored_version.as_str() < calculator_version {
                    self.client
                        .execute(
                            "UPDATE difficulty_calculations SET calculator_version = $1 WHERE id = $2",
                            &[&calculator_version, &id]
                        )
                        .await?;
                    self.client
                        .execute("DELETE FROM difficulty_values WHERE calculation_id = $1", &[&id])
                        .await?;
                }
                id
            }
            None => {
                let row = self
                    .client
                    .query_one(
                        "INSERT INTO difficulty_calculations (beatmap_id, mods, engine, calculator_version) \
                         VALUES ($1, $2, $3, $4) RETURNING id",
                        &[&beatmap_id, &i64::from(mods.bits()), &engine, &calculator_version]
                    )
                    .await?;
                row.get("id")
            }
        };

        let values = self
            .load_values("difficulty_values", &[id])
            .await?
            .remove(&id)
            .unwrap_or_default();

        Ok(Some(DifficultyCalculation {
            id,
            beatmap_id,
            mods,
            engine: engine.to_string(),
            calculator_version: calculator_version.to_string(),
            values
        }))
    }

    async fn replace_difficulty_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> Result<(), StoreError> {
        self.replace_values("difficulty_values", calculation_id, values).await
    }

    async fn get_performance_calculations(
        &self,
        score_ids: &[i64],
        engine: &str
    ) -> Result<Vec<PerformanceCalculation>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM performance_calculations WHERE score_id = ANY($1) AND engine = $2",
                &[&score_ids, &engine]
            )
            .await?;

        let mut calculations = rows
            .iter()
            .map(|row| PerformanceCalculation {
                id: row.get("id"),
                score_id: row.get("score_id"),
                difficulty_calculation_id: row.get("difficulty_calculation_id"),
                engine: row.get("engine"),
                calculator_version: row.get("calculator_version"),
                values: Vec::new()
            })
            .collect_vec();

        let ids = calculations.iter().map(|c| c.id).collect_vec();
        let mut values = self.load_values("performance_values", &ids).await?;
        for calculation in &mut calculations {
            calculation.values = values.remove(&calculation.id).unwrap_or_default();
        }

        Ok(calculations)
    }

    async fn upsert_performance_calculation(
        &self,
        score_id: i64,
        difficulty_calculation_id: i64,
        engine: &str,
        calculator_version: &str
    ) -> Result<Option<PerformanceCalculation>, StoreError> {
        let existing = self
            .client
            .query_opt(
                "SELECT id, calculator_version FROM performance_calculations WHERE score_id = $1 AND engine = $2",
                &[&score_id, &engine]
            )
            .await?;

        let id = match existing {
            Some(row) => {
                let id = row.get::<_, i64>("id");
                let stored_version = row.get::<_, String>("calculator_version");
                if stored_version.as_str() > calculator_version {
                    return Ok(None);
                }
                if stored_version.as_str() < calculator_version {
                    self.client
                        .execute(
                            "UPDATE performance_calculations SET calculator_version = $1, \
                             difficulty_calculation_id = $2 WHERE id = $3",
                            &[&calculator_version, &difficulty_calculation_id, &id]
                        )
                        .await?;
                    self.client
                        .execute("DELETE FROM performance_values WHERE calculation_id = $1", &[&id])
                        .await?;
                }
                id
            }
            None => {
                let row = self
                    .client
                    .query_one(
                        "INSERT INTO performance_calculations (score_id, difficulty_calculation_id, engine, \
                         calculator_version) VALUES ($1, $2, $3, $4) RETURNING id",
                        &[&score_id, &difficulty_calculation_id, &engine, &calculator_version]
                    )
                    .await?;
                row.get("id")
            }
        };

        let values = self
            .load_values("performance_values", &[id])
            .await?
            .remove(&id)
            .unwrap_or_default();

        Ok(Some(PerformanceCalculation {
            id,
            score_id,
            difficulty_calculation_id,
            engine: engine.to_string(),
            calculator_version: calculator_version.to_string(),
            values
        }))
    }

    async fn replace_performance_values(
        &self,
        calculation_id: i64,
        values: &[CalculationValue]
    ) -> Result<(), StoreError> {
        self.replace_values("performance_values", calculation_id, values).await
    }

    async fn get_leaderboard(&self, leaderboard_id: i64) -> Result<Option<Leaderboard>, StoreError> {
        let row = self
            .client
            .query_opt("SELECT * FROM leaderboards WHERE id = $1", &[&leaderboard_id])
            .await?;

        row.as_ref().map(Self::leaderboard_from_row).transpose()
    }

    async fn get_member_leaderboard_ids(&self, user_id: i64, gamemode: Gamemode) -> Result<Vec<i64>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT m.leaderboard_id FROM memberships m \
                 JOIN leaderboards l ON l.id = m.leaderboard_id \
                 WHERE m.user_id = $1 AND l.gamemode = $2",
                &[&user_id, &(gamemode as i32)]
            )
            .await?;

        Ok(rows.iter().map(|row| row.get("leaderboard_id")).collect())
    }

    async fn get_membership(&self, leaderboard_id: i64, user_id: i64) -> Result<Option<Membership>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM memberships WHERE leaderboard_id = $1 AND user_id = $2",
                &[&leaderboard_id, &user_id]
            )
            .await?;

        Ok(row.as_ref().map(Self::membership_from_row))
    }

    async fn insert_membership(
        &self,
        leaderboard_id: i64,
        user_id: i64,
        joined_at: DateTime<Utc>
    ) -> Result<Membership, StoreError> {
        let row = self
            .client
            .query_one(
                "INSERT INTO memberships (leaderboard_id, user_id, pp, score_count, rank, joined_at) \
                 VALUES ($1, $2, 0, 0, 0, $3) RETURNING id",
                &[&leaderboard_id, &user_id, &joined_at]
            )
            .await?;

        Ok(Membership {
            id: row.get("id"),
            leaderboard_id,
            user_id,
            pp: 0.0,
            score_count: 0,
            rank: 0,
            joined_at
        })
    }

    async fn delete_membership(&self, leaderboard_id: i64, user_id: i64) -> Result<(), StoreError> {
        self.client
            .execute(
                "DELETE FROM membership_scores WHERE membership_id IN \
                 (SELECT id FROM memberships WHERE leaderboard_id = $1 AND user_id = $2)",
                &[&leaderboard_id, &user_id]
            )
            .await?;
        self.client
            .execute(
                "DELETE FROM memberships WHERE leaderboard_id = $1 AND user_id = $2",
                &[&leaderboard_id, &user_id]
            )
            .await?;

        info!("Removed membership of user {} from leaderboard {}", user_id, leaderboard_id);
        Ok(())
    }

    async fn get_membership_scores(&self, membership_id: i64) -> Result<Vec<MembershipScore>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM membership_scores WHERE membership_id = $1",
                &[&membership_id]
            )
            .await?;

        Ok(rows.iter().map(Self::membership_score_from_row).collect())
    }

    async fn count_memberships_above(
        &self,
        leaderboard_id: i64,
        pp: f64,
        exclude_membership_id: i64
    ) -> Result<i64, StoreError> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) AS above FROM memberships WHERE leaderboard_id = $1 AND pp > $2 AND id != $3",
                &[&leaderboard_id, &pp, &exclude_membership_id]
            )
            .await?;

        Ok(row.get("above"))
    }

    async fn leaderboard_record(&self, leaderboard_id: i64) -> Result<Option<MembershipScore>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM membership_scores WHERE leaderboard_id = $1 ORDER BY raw_pp DESC LIMIT 1",
                &[&leaderboard_id]
            )
            .await?;

        Ok(row.as_ref().map(Self::membership_score_from_row))
    }

    async fn top_member(&self, leaderboard_id: i64) -> Result<Option<Membership>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM memberships WHERE leaderboard_id = $1 ORDER BY pp DESC LIMIT 1",
                &[&leaderboard_id]
            )
            .await?;

        Ok(row.as_ref().map(Self::membership_from_row))
    }

    async fn commit_membership_update(&self, update: &MembershipUpdate) -> Result<Membership, StoreError> {
        // Built as a single batch so the statements reach the server as one
        // simple-query message: concurrent readers observe either the old
        // state or the fully-updated one.
        let mut statements = vec!["BEGIN;".to_string()];

        for score in &update.inserted {
            statements.push(format!(
                "INSERT INTO membership_scores (leaderboard_id, membership_id, score_id, raw_pp, weighted_pp) \
                 VALUES ({}, {}, {}, {}, {});",
                score.leaderboard_id, score.membership_id, score.score_id, score.raw_pp, score.weighted_pp
            ));
        }

        for score in &update.updated {
            statements.push(format!(
                "UPDATE membership_scores SET raw_pp = {}, weighted_pp = {} \
                 WHERE membership_id = {} AND score_id = {};",
                score.raw_pp, score.weighted_pp, score.membership_id, score.score_id
            ));
        }

        if !update.removed_score_ids.is_empty() {
            statements.push(format!(
                "DELETE FROM membership_scores WHERE membership_id = {} AND score_id = ANY(ARRAY[{}]);",
                update.membership_id,
                update.removed_score_ids.iter().join(",")
            ));
        }

        statements.push(format!(
            "UPDATE memberships SET pp = {}, score_count = {}, rank = {} WHERE id = {};",
            update.pp, update.score_count, update.rank, update.membership_id
        ));
        statements.push("COMMIT;".to_string());

        self.client.batch_execute(statements.join("\n").as_str()).await?;

        let row = self
            .client
            .query_opt("SELECT * FROM memberships WHERE id = $1", &[&update.membership_id])
            .await?;

        row.as_ref()
            .map(Self::membership_from_row)
            .ok_or(StoreError::MissingRow {
                entity: "membership",
                id: update.membership_id
            })
    }

    async fn find_invite(&self, leaderboard_id: i64, user_id: i64) -> Result<Option<Invite>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM invites WHERE leaderboard_id = $1 AND user_id = $2",
                &[&leaderboard_id, &user_id]
            )
            .await?;

        Ok(row.map(|row| Invite {
            id: row.get("id"),
            leaderboard_id: row.get("leaderboard_id"),
            user_id: row.get("user_id"),
            message: row.get("message"),
            created_at: row.get("created_at")
        }))
    }

    async fn delete_invite(&self, invite_id: i64) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM invites WHERE id = $1", &[&invite_id])
            .await?;
        Ok(())
    }
}

//! Backup table catalog.
//!
//! Thirteen relational tables mirror the source collections. The array is
//! ordered so that referenced tables are created before the tables that
//! carry foreign keys into them.

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;

/// One backup table: where its documents come from and how to create it.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Relational table name.
    pub table: &'static str,
    /// Source collection holding the documents.
    pub collection: &'static str,
    /// DDL run before a full backup.
    pub create: &'static str,
    /// Table carries profile image blobs and takes the fallback insert path.
    pub images: bool,
}

const CREATE_USERS: &str = r"
    CREATE TABLE IF NOT EXISTS users (
      id VARCHAR(255) PRIMARY KEY,
      full_name VARCHAR(255) NOT NULL,
      email VARCHAR(255) UNIQUE NOT NULL,
      role ENUM('STUDENT', 'TEACHER', 'HOD') NOT NULL DEFAULT 'STUDENT',
      password VARCHAR(255) NOT NULL,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      accepted_terms BOOLEAN DEFAULT FALSE,
      profile_complete BOOLEAN DEFAULT FALSE,
      INDEX idx_email (email),
      INDEX idx_role (role)
    )";

const CREATE_TEACHERS: &str = r"
    CREATE TABLE IF NOT EXISTS teachers (
      id VARCHAR(255) PRIMARY KEY,
      user_id VARCHAR(255) UNIQUE NOT NULL,
      address TEXT,
      gender ENUM('Male', 'Female', 'Other'),
      date_of_hire DATE,
      subjects JSON,
      dept_name VARCHAR(255),
      qualification VARCHAR(255),
      date_of_birth DATE,
      profile_image_data LONGBLOB,
      profile_image_content_type VARCHAR(100),
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    )";

const CREATE_STUDENTS: &str = r"
    CREATE TABLE IF NOT EXISTS students (
      id VARCHAR(255) PRIMARY KEY,
      user_id VARCHAR(255) UNIQUE NOT NULL,
      address TEXT,
      attendance INT DEFAULT 0,
      joined_portals JSON,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    )";

const CREATE_HODS: &str = r"
    CREATE TABLE IF NOT EXISTS hods (
      id VARCHAR(255) PRIMARY KEY,
      user_id VARCHAR(255) UNIQUE NOT NULL,
      phone_number VARCHAR(20),
      gender ENUM('male', 'female', 'other'),
      date_of_birth DATE,
      profile_image_data LONGBLOB,
      profile_image_content_type VARCHAR(100),
      department_name VARCHAR(100) NOT NULL,
      qualification VARCHAR(255),
      address TEXT,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    )";

const CREATE_PORTALS: &str = r"
    CREATE TABLE IF NOT EXISTS portals (
      id VARCHAR(255) PRIMARY KEY,
      name VARCHAR(255) NOT NULL,
      description TEXT,
      portal_id VARCHAR(255) UNIQUE NOT NULL,
      sub_portals JSON,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )";

const CREATE_SUB_PORTALS: &str = r"
    CREATE TABLE IF NOT EXISTS sub_portals (
      id VARCHAR(255) PRIMARY KEY,
      title VARCHAR(255) NOT NULL,
      type ENUM('quiz', 'assignment', 'lecture') NOT NULL,
      file_url VARCHAR(500),
      portal_id VARCHAR(255) NOT NULL,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (portal_id) REFERENCES portals(id) ON DELETE CASCADE
    )";

const CREATE_COURSES: &str = r"
    CREATE TABLE IF NOT EXISTS courses (
      id VARCHAR(255) PRIMARY KEY,
      name VARCHAR(255),
      teacher_id VARCHAR(255),
      students JSON,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (teacher_id) REFERENCES teachers(id) ON DELETE SET NULL
    )";

const CREATE_QUIZZES: &str = r"
    CREATE TABLE IF NOT EXISTS quizzes (
      id VARCHAR(255) PRIMARY KEY,
      course_id VARCHAR(255),
      questions JSON,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
    )";

const CREATE_QUIZ_RESULTS: &str = r"
    CREATE TABLE IF NOT EXISTS quiz_results (
      id VARCHAR(255) PRIMARY KEY,
      student_id VARCHAR(255),
      quiz_id VARCHAR(255),
      answers JSON,
      score INT,
      submitted_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
      FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
    )";

const CREATE_PERFORMANCES: &str = r"
    CREATE TABLE IF NOT EXISTS performances (
      id VARCHAR(255) PRIMARY KEY,
      student_id VARCHAR(255),
      course_id VARCHAR(255),
      grade VARCHAR(10),
      progress INT,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
      FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
    )";

const CREATE_FEEDBACKS: &str = r"
    CREATE TABLE IF NOT EXISTS feedbacks (
      id VARCHAR(255) PRIMARY KEY,
      student_id VARCHAR(255),
      course_id VARCHAR(255),
      teacher_id VARCHAR(255),
      feedback_text TEXT,
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
      FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
      FOREIGN KEY (teacher_id) REFERENCES teachers(id) ON DELETE CASCADE
    )";

const CREATE_EXTENSION_REQUESTS: &str = r"
    CREATE TABLE IF NOT EXISTS extension_requests (
      id VARCHAR(255) PRIMARY KEY,
      assignment_id VARCHAR(255),
      student_id VARCHAR(255),
      proposed_date DATE,
      reason TEXT,
      status VARCHAR(50) DEFAULT 'Pending',
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
    )";

const CREATE_ANNOUNCEMENTS: &str = r"
    CREATE TABLE IF NOT EXISTS announcements (
      id VARCHAR(255) PRIMARY KEY,
      portal_id VARCHAR(255) NOT NULL,
      message TEXT NOT NULL,
      posted_by VARCHAR(255),
      created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
      updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
      FOREIGN KEY (portal_id) REFERENCES portals(id) ON DELETE CASCADE,
      FOREIGN KEY (posted_by) REFERENCES teachers(id) ON DELETE SET NULL
    )";

/// All backup tables in creation order.
pub const TABLES: &[TableSpec] = &[
    TableSpec {
        table: "users",
        collection: "users",
        create: CREATE_USERS,
        images: false,
    },
    TableSpec {
        table: "teachers",
        collection: "teachers",
        create: CREATE_TEACHERS,
        images: true,
    },
    TableSpec {
        table: "students",
        collection: "students",
        create: CREATE_STUDENTS,
        images: false,
    },
    TableSpec {
        table: "hods",
        collection: "hods",
        create: CREATE_HODS,
        images: true,
    },
    TableSpec {
        table: "portals",
        collection: "portals",
        create: CREATE_PORTALS,
        images: false,
    },
    TableSpec {
        table: "sub_portals",
        collection: "subportals",
        create: CREATE_SUB_PORTALS,
        images: false,
    },
    TableSpec {
        table: "courses",
        collection: "courses",
        create: CREATE_COURSES,
        images: false,
    },
    TableSpec {
        table: "quizzes",
        collection: "quizzes",
        create: CREATE_QUIZZES,
        images: false,
    },
    TableSpec {
        table: "quiz_results",
        collection: "quizresults",
        create: CREATE_QUIZ_RESULTS,
        images: false,
    },
    TableSpec {
        table: "performances",
        collection: "performances",
        create: CREATE_PERFORMANCES,
        images: false,
    },
    TableSpec {
        table: "feedbacks",
        collection: "feedbacks",
        create: CREATE_FEEDBACKS,
        images: false,
    },
    TableSpec {
        table: "extension_requests",
        collection: "extensionrequests",
        create: CREATE_EXTENSION_REQUESTS,
        images: false,
    },
    TableSpec {
        table: "announcements",
        collection: "announcements",
        create: CREATE_ANNOUNCEMENTS,
        images: false,
    },
];

/// Tables backed up through the plain row path.
pub fn regular_tables() -> impl Iterator<Item = &'static TableSpec> {
    TABLES.iter().filter(|spec| !spec.images)
}

/// Tables whose rows carry profile image blobs.
pub fn image_tables() -> impl Iterator<Item = &'static TableSpec> {
    TABLES.iter().filter(|spec| spec.images)
}

/// Create every backup table that does not exist yet.
pub async fn create_tables(conn: &mut Conn) -> Result<()> {
    for spec in TABLES {
        conn.query_drop(spec.create)
            .await
            .with_context(|| format!("Failed to create table {}", spec.table))?;
        tracing::debug!("Created table {}", spec.table);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_is_complete() {
        assert_eq!(TABLES.len(), 13);

        let names: HashSet<&str> = TABLES.iter().map(|spec| spec.table).collect();
        assert_eq!(names.len(), 13);

        let collections: HashSet<&str> = TABLES.iter().map(|spec| spec.collection).collect();
        assert_eq!(collections.len(), 13);
    }

    #[test]
    fn test_image_tables() {
        let image: Vec<&str> = image_tables().map(|spec| spec.table).collect();
        assert_eq!(image, vec!["teachers", "hods"]);

        assert_eq!(regular_tables().count(), 11);
        assert!(regular_tables().all(|spec| !spec.create.contains("LONGBLOB")));
        assert!(image_tables().all(|spec| spec.create.contains("LONGBLOB")));
    }

    #[test]
    fn test_ddl_shape() {
        for spec in TABLES {
            assert!(
                spec.create.contains("CREATE TABLE IF NOT EXISTS"),
                "{} DDL must be idempotent",
                spec.table
            );
            assert!(
                spec.create.contains(spec.table),
                "{} DDL must name its table",
                spec.table
            );
            assert!(
                spec.create.contains("id VARCHAR(255) PRIMARY KEY"),
                "{} must key on the document id",
                spec.table
            );
        }
    }

    #[test]
    fn test_references_precede_dependents() {
        let mut seen: HashSet<&str> = HashSet::new();
        for spec in TABLES {
            for reference in ["users", "portals", "teachers", "students", "courses", "quizzes"] {
                if spec.create.contains(&format!("REFERENCES {reference}(")) {
                    assert!(
                        seen.contains(reference),
                        "{} references {} before it is created",
                        spec.table,
                        reference
                    );
                }
            }
            seen.insert(spec.table);
        }
    }
}

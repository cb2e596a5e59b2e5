//! Embedded Dockerfile templates, one per supported runtime.
//!
//! The content is static data consumed by the external build tool;
//! the generator picks a template, it never composes one.

/// Dockerfile for Spring Boot projects (Gradle wrapper or Maven).
pub(crate) const SPRING_DOCKERFILE: &str = include_str!("spring.dockerfile");

/// Dockerfile for React projects (two-stage build, served with `serve`).
pub(crate) const REACT_DOCKERFILE: &str = include_str!("react.dockerfile");

/// Dockerfile for FastAPI projects (uvicorn).
pub(crate) const FASTAPI_DOCKERFILE: &str = include_str!("fastapi.dockerfile");

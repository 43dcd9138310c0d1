mod tests_appenders;
